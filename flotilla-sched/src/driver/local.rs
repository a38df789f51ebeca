/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process transport.
//!
//! [`LocalCluster`] plays the master and every agent of an
//! [`AgentInventory`] inside one tokio task:
//!
//! ```text
//!  offer tick ──► resource_offers ──► launch ──► PayloadExecutor (tokio task)
//!                                                     │ ExecutorEvent
//!  status_update ◄──────────────── mpsc channel ◄─────┘
//! ```
//!
//! Scheduler callbacks run one at a time on the loop task; driver commands
//! act on the cluster state immediately.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DriverError, DriverStatus, Filters, MasterInfo, Scheduler, SchedulerDriver};
use crate::config::{AgentConfig, AgentInventory};
use crate::executor::{ChannelExecutorDriver, ExecutorEvent, PayloadExecutor};
use crate::lifecycle::{TaskState, TaskStatus};
use crate::offer::{
    FrameworkId, NodeId, OfferId, ResourceOffer, Resources, TaskId, TaskPlacement,
};

/// Default period between offer rounds.
pub const DEFAULT_OFFER_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest accepted period between offer rounds.
pub const MIN_OFFER_INTERVAL: Duration = Duration::from_millis(1);

const DEFAULT_FRAMEWORK_NAME: &str = "flotilla";

// ── Cluster state ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct AgentState {
    config: AgentConfig,
    reserved: Resources,
    refused_until: Option<Instant>,
    outstanding: Option<OfferId>,
}

impl AgentState {
    fn available(&self) -> Resources {
        let mut available = self.config.resources.clone();
        available.subtract(&self.reserved);
        available
    }

    fn refuse(&mut self, filters: Filters) {
        let until = Instant::now() + Duration::from_secs_f64(filters.refuse_seconds.max(0.0));
        self.refused_until = Some(until);
    }

    fn offerable(&self, now: Instant) -> bool {
        self.outstanding.is_none() && self.refused_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug)]
struct RunningTask {
    node_id: NodeId,
    resources: Resources,
    handle: JoinHandle<()>,
}

/// The [`SchedulerDriver`] handed to scheduler callbacks.
struct LocalDriver {
    status: DriverStatus,
    graceful: bool,
    agents: BTreeMap<NodeId, AgentState>,
    offers: HashMap<OfferId, NodeId>,
    running: HashMap<TaskId, RunningTask>,
    executor: Arc<PayloadExecutor>,
    events: mpsc::UnboundedSender<ExecutorEvent>,
    next_offer: u64,
}

impl LocalDriver {
    fn ensure_running(&self) -> Result<(), DriverError> {
        match self.status {
            DriverStatus::Running => Ok(()),
            other => Err(DriverError::NotRunning(other)),
        }
    }

    /// Build one offer per agent that has free resources and is neither
    /// refused nor holding an outstanding offer.
    fn make_offers(&mut self, now: Instant) -> Vec<ResourceOffer> {
        let mut offers = Vec::new();
        for (node_id, agent) in &mut self.agents {
            if !agent.offerable(now) {
                continue;
            }
            let available = agent.available();
            if !available.iter().any(|(_, q)| q > 0.0) {
                continue;
            }

            self.next_offer += 1;
            let offer_id = OfferId::new(format!("offer-{}", self.next_offer));
            agent.refused_until = None;
            agent.outstanding = Some(offer_id.clone());
            self.offers.insert(offer_id.clone(), node_id.clone());

            let mut offer = ResourceOffer::new(offer_id, node_id.clone(), available);
            offer.hostname = agent.config.hostname.clone();
            offers.push(offer);
        }
        offers
    }

    /// Remove `offer_id` from the outstanding set, returning its agent.
    fn take_offer(&mut self, offer_id: &OfferId) -> Option<NodeId> {
        let node_id = self.offers.remove(offer_id)?;
        if let Some(agent) = self.agents.get_mut(&node_id) {
            agent.outstanding = None;
        }
        Some(node_id)
    }

    fn emit(&self, status: TaskStatus) {
        // The receiver lives as long as the run loop.
        if self.events.send(ExecutorEvent::Status(status)).is_err() {
            debug!("status channel closed, dropping update");
        }
    }

    fn lose(&self, placement: &TaskPlacement, reason: &str) {
        warn!(task = %placement.task_id, offer = %placement.offer_id, reason, "task lost");
        self.emit(
            TaskStatus::now(placement.task_id.clone(), TaskState::Lost)
                .with_node(placement.node_id.clone())
                .with_message(reason),
        );
    }

    fn start_task(&mut self, node_id: &NodeId, placement: TaskPlacement) {
        let Some(executor_id) = placement.executor.as_ref().map(|e| e.executor_id.clone()) else {
            self.lose(&placement, "no executor attached to task");
            return;
        };
        let fits = match self.agents.get(node_id) {
            Some(agent) => agent.available().contains(&placement.resources),
            None => {
                self.lose(&placement, "agent not found");
                return;
            }
        };
        if !fits {
            self.lose(&placement, "insufficient resources on agent");
            return;
        }
        if let Some(agent) = self.agents.get_mut(node_id) {
            agent.reserved.add(&placement.resources);
        }

        let driver = ChannelExecutorDriver::new(
            executor_id,
            node_id.clone(),
            self.events.clone(),
        );
        let executor = Arc::clone(&self.executor);
        let task_id = placement.task_id.clone();
        let resources = placement.resources.clone();

        debug!(task = %task_id, node = %node_id, "starting executor pipeline");
        let handle = tokio::spawn(async move {
            if let Err(e) = executor.launch_task(&driver, &placement).await {
                debug!(task = %placement.task_id, stage = e.stage(), "pipeline ended early");
            }
        });

        self.running.insert(
            task_id,
            RunningTask {
                node_id: node_id.clone(),
                resources,
                handle,
            },
        );
    }

    /// Free the resources of a task that reached a terminal state.
    fn release(&mut self, task_id: &TaskId) {
        if let Some(task) = self.running.remove(task_id) {
            if let Some(agent) = self.agents.get_mut(&task.node_id) {
                agent.reserved.subtract(&task.resources);
            }
        }
    }

    fn abort_all(&mut self) {
        for (task_id, task) in self.running.drain() {
            debug!(task = %task_id, "aborting pipeline");
            task.handle.abort();
        }
    }

    fn dispatch(&mut self, scheduler: &mut dyn Scheduler, event: ExecutorEvent) {
        match event {
            ExecutorEvent::Status(status) => {
                if status.state.is_terminal() {
                    self.release(&status.task_id);
                }
                scheduler.status_update(self, status);
            }
            ExecutorEvent::Message {
                executor_id,
                node_id,
                data,
            } => scheduler.framework_message(self, &executor_id, &node_id, &data),
        }
    }
}

impl SchedulerDriver for LocalDriver {
    fn launch(
        &mut self,
        offer_ids: &[OfferId],
        placements: Vec<TaskPlacement>,
        filters: Filters,
    ) -> Result<DriverStatus, DriverError> {
        self.ensure_running()?;

        let mut accepted: HashMap<OfferId, NodeId> = HashMap::new();
        for offer_id in offer_ids {
            match self.take_offer(offer_id) {
                Some(node_id) => {
                    accepted.insert(offer_id.clone(), node_id);
                }
                None => warn!(offer = %offer_id, "launch on unknown or stale offer"),
            }
        }

        for placement in placements {
            match accepted.get(&placement.offer_id).cloned() {
                Some(node_id) => self.start_task(&node_id, placement),
                None => self.lose(&placement, "offer is no longer valid"),
            }
        }

        for node_id in accepted.values() {
            if let Some(agent) = self.agents.get_mut(node_id) {
                agent.refuse(filters);
            }
        }
        Ok(self.status)
    }

    fn decline(
        &mut self,
        offer_ids: &[OfferId],
        filters: Filters,
    ) -> Result<DriverStatus, DriverError> {
        self.ensure_running()?;
        let mut unknown = None;
        for offer_id in offer_ids {
            match self.take_offer(offer_id) {
                Some(node_id) => {
                    if let Some(agent) = self.agents.get_mut(&node_id) {
                        agent.refuse(filters);
                    }
                    debug!(
                        offer  = %offer_id,
                        node   = %node_id,
                        refuse = filters.refuse_seconds,
                        "offer declined"
                    );
                }
                None => {
                    unknown.get_or_insert_with(|| offer_id.clone());
                }
            }
        }
        // Known offers in the batch are released even when one is unknown.
        match unknown {
            Some(offer_id) => Err(DriverError::UnknownOffer(offer_id)),
            None => Ok(self.status),
        }
    }

    fn kill(&mut self, task_id: &TaskId) -> Result<DriverStatus, DriverError> {
        self.ensure_running()?;
        match self.running.get(task_id) {
            Some(task) => {
                task.handle.abort();
                let node_id = task.node_id.clone();
                self.release(task_id);
                self.emit(TaskStatus::now(task_id.clone(), TaskState::Killed).with_node(node_id));
            }
            None => self.emit(
                TaskStatus::now(task_id.clone(), TaskState::Lost)
                    .with_message("kill requested for unknown task"),
            ),
        }
        Ok(self.status)
    }

    fn acknowledge_status(&mut self, status: &TaskStatus) -> Result<DriverStatus, DriverError> {
        self.ensure_running()?;
        debug!(task = %status.task_id, state = %status.state, "status acknowledged");
        Ok(self.status)
    }

    fn stop(&mut self, graceful: bool) -> Result<DriverStatus, DriverError> {
        self.ensure_running()?;
        info!(graceful, "driver stop requested");
        self.status = DriverStatus::Stopped;
        self.graceful = graceful;
        Ok(self.status)
    }
}

// ── LocalCluster ──────────────────────────────────────────────────────────────

/// In-process master plus agents.
pub struct LocalCluster {
    inventory: AgentInventory,
    executor: PayloadExecutor,
    framework_name: String,
    offer_interval: Duration,
}

impl LocalCluster {
    pub fn new(inventory: AgentInventory, executor: PayloadExecutor) -> Self {
        Self {
            inventory,
            executor,
            framework_name: DEFAULT_FRAMEWORK_NAME.to_string(),
            offer_interval: DEFAULT_OFFER_INTERVAL,
        }
    }

    /// Period between offer rounds, clamped to [`MIN_OFFER_INTERVAL`].
    pub fn with_offer_interval(mut self, interval: Duration) -> Self {
        self.offer_interval = interval.max(MIN_OFFER_INTERVAL);
        self
    }

    /// Name the framework registers under.
    pub fn with_framework_name(mut self, name: impl Into<String>) -> Self {
        self.framework_name = name.into();
        self
    }

    pub fn offer_interval(&self) -> Duration {
        self.offer_interval
    }

    /// Register `scheduler` and drive it until it stops the driver or
    /// Ctrl-C is received.  Returns the final driver status.
    pub async fn run(self, scheduler: &mut dyn Scheduler) -> DriverStatus {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let agents = self
            .inventory
            .agents()
            .map(|config| {
                (
                    config.node_id.clone(),
                    AgentState {
                        config: config.clone(),
                        reserved: Resources::new(),
                        refused_until: None,
                        outstanding: None,
                    },
                )
            })
            .collect();

        let mut driver = LocalDriver {
            status: DriverStatus::Running,
            graceful: true,
            agents,
            offers: HashMap::new(),
            running: HashMap::new(),
            executor: Arc::new(self.executor),
            events: tx,
            next_offer: 0,
        };

        let framework_id = FrameworkId::new(format!("flotilla-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        let master = MasterInfo {
            id: "local-master".to_string(),
            hostname: "localhost".to_string(),
            port: 0,
        };
        info!(
            framework = %framework_id,
            name = %self.framework_name,
            agents = driver.agents.len(),
            interval_ms = self.offer_interval.as_millis() as u64,
            "local cluster started"
        );
        scheduler.registered(&mut driver, &framework_id, &master);

        let mut ticker = tokio::time::interval(self.offer_interval);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        while driver.status == DriverStatus::Running {
            tokio::select! {
                _ = ticker.tick() => {
                    let offers = driver.make_offers(Instant::now());
                    if !offers.is_empty() {
                        scheduler.resource_offers(&mut driver, offers);
                    }
                }
                Some(event) = rx.recv() => driver.dispatch(scheduler, event),
                _ = &mut shutdown => {
                    warn!("Ctrl-C received, aborting run");
                    driver.status = DriverStatus::Aborted;
                    driver.graceful = false;
                }
            }
        }

        if driver.graceful {
            for (task_id, task) in driver.running.drain() {
                debug!(task = %task_id, "waiting for in-flight pipeline");
                if let Err(e) = task.handle.await {
                    warn!(task = %task_id, error = %e, "pipeline task ended abnormally");
                }
            }
        } else {
            driver.abort_all();
        }

        info!(status = ?driver.status, "local cluster stopped");
        driver.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::executor_info;
    use crate::config::FrameworkConfig;
    use crate::controller::OfferScheduler;
    use crate::offer::{CPUS, MEM};

    fn local_driver(agents: Vec<AgentConfig>) -> (LocalDriver, mpsc::UnboundedReceiver<ExecutorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = LocalDriver {
            status: DriverStatus::Running,
            graceful: true,
            agents: agents
                .into_iter()
                .map(|config| {
                    (
                        config.node_id.clone(),
                        AgentState {
                            config,
                            reserved: Resources::new(),
                            refused_until: None,
                            outstanding: None,
                        },
                    )
                })
                .collect(),
            offers: HashMap::new(),
            running: HashMap::new(),
            executor: Arc::new(PayloadExecutor::new(std::env::temp_dir())),
            events: tx,
            next_offer: 0,
        };
        (driver, rx)
    }

    fn placement(task: &str, offer: &OfferId, node: &NodeId) -> TaskPlacement {
        TaskPlacement {
            task_id: TaskId::new(task),
            name: format!("flotilla-task-{task}"),
            node_id: node.clone(),
            offer_id: offer.clone(),
            resources: Resources::new().with(CPUS, 1.0).with(MEM, 128.0),
            payload: b"unit".to_vec(),
            executor: Some(executor_info("http://127.0.0.1:1/flotilla-exec", "./flotilla-exec")),
        }
    }

    #[tokio::test]
    async fn agent_with_outstanding_offer_is_not_reoffered() {
        let (mut driver, _rx) = local_driver(vec![AgentConfig::default_agent()]);
        let first = driver.make_offers(Instant::now());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].cpus(), 2.0);
        assert!(driver.make_offers(Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn decline_refuses_agent_for_filter_duration() {
        let (mut driver, _rx) = local_driver(vec![AgentConfig::default_agent()]);
        let offer = driver.make_offers(Instant::now()).remove(0);
        driver
            .decline(&[offer.id.clone()], Filters::refuse_for(60.0))
            .unwrap();
        assert!(driver.make_offers(Instant::now()).is_empty());
        assert!(!driver
            .make_offers(Instant::now() + Duration::from_secs(61))
            .is_empty());
    }

    #[tokio::test]
    async fn decline_of_unknown_offer_is_reported() {
        let (mut driver, _rx) = local_driver(vec![AgentConfig::default_agent()]);
        let offer = driver.make_offers(Instant::now()).remove(0);
        let result = driver.decline(
            &[OfferId::new("offer-42"), offer.id.clone()],
            Filters::refuse_for(0.0),
        );
        assert_eq!(result, Err(DriverError::UnknownOffer(OfferId::new("offer-42"))));
        assert!(driver.offers.is_empty(), "known offer still released");
    }

    #[tokio::test]
    async fn launch_reserves_resources_on_agent() {
        let (mut driver, _rx) = local_driver(vec![AgentConfig::default_agent()]);
        let offer = driver.make_offers(Instant::now()).remove(0);
        let p = placement("1", &offer.id, &offer.node_id);
        driver
            .launch(&[offer.id.clone()], vec![p], Filters::refuse_for(0.0))
            .unwrap();

        let next = driver.make_offers(Instant::now() + Duration::from_millis(1));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].cpus(), 1.0);
        assert_eq!(next[0].mem(), 896.0);
        driver.abort_all();
    }

    #[tokio::test]
    async fn launch_on_stale_offer_reports_lost() {
        let (mut driver, mut rx) = local_driver(vec![AgentConfig::default_agent()]);
        let stale = OfferId::new("offer-99");
        let p = placement("1", &stale, &NodeId::new("default_agent"));
        driver
            .launch(&[stale], vec![p], Filters::default())
            .unwrap();

        match rx.recv().await {
            Some(ExecutorEvent::Status(s)) => assert_eq!(s.state, TaskState::Lost),
            other => panic!("expected lost status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn launch_without_executor_reports_lost() {
        let (mut driver, mut rx) = local_driver(vec![AgentConfig::default_agent()]);
        let offer = driver.make_offers(Instant::now()).remove(0);
        let mut p = placement("1", &offer.id, &offer.node_id);
        p.executor = None;
        driver
            .launch(&[offer.id.clone()], vec![p], Filters::refuse_for(0.0))
            .unwrap();

        match rx.recv().await {
            Some(ExecutorEvent::Status(s)) => assert_eq!(s.state, TaskState::Lost),
            other => panic!("expected lost status, got {other:?}"),
        }
        assert!(driver.running.is_empty());
        assert!(driver.agents.values().all(|a| a.reserved.get(CPUS) == 0.0));
    }

    #[tokio::test]
    async fn kill_emits_killed_and_releases() {
        let (mut driver, mut rx) = local_driver(vec![AgentConfig::default_agent()]);
        let offer = driver.make_offers(Instant::now()).remove(0);
        let p = placement("1", &offer.id, &offer.node_id);
        driver
            .launch(&[offer.id.clone()], vec![p], Filters::refuse_for(0.0))
            .unwrap();
        driver.kill(&TaskId::new("1")).unwrap();
        assert!(driver.running.is_empty());

        let mut saw_killed = false;
        while let Ok(ExecutorEvent::Status(s)) = rx.try_recv() {
            saw_killed |= s.state == TaskState::Killed;
        }
        assert!(saw_killed);
        assert!(driver.agents.values().all(|a| a.reserved.get(CPUS) == 0.0));
    }

    #[tokio::test]
    async fn commands_after_stop_are_rejected() {
        let (mut driver, _rx) = local_driver(vec![AgentConfig::default_agent()]);
        driver.stop(true).unwrap();
        assert_eq!(
            driver.decline(&[], Filters::default()),
            Err(DriverError::NotRunning(DriverStatus::Stopped))
        );
    }

    fn cluster_config(total: u32) -> FrameworkConfig {
        FrameworkConfig {
            total_tasks: total,
            cpus_per_task: 1.0,
            mem_per_task: 128.0,
            artifact_server_address: "inline-work-unit".to_string(),
            refuse_seconds: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_completes_all_tasks_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let info = executor_info("http://127.0.0.1:1/flotilla-exec", "./flotilla-exec");
        let mut scheduler = OfferScheduler::new(&cluster_config(3), info).unwrap();

        let cluster = LocalCluster::new(
            AgentInventory::with_default_agent(),
            PayloadExecutor::new(dir.path()),
        )
        .with_offer_interval(Duration::from_millis(10));

        let status = tokio::time::timeout(Duration::from_secs(10), cluster.run(&mut scheduler))
            .await
            .expect("run did not complete");

        assert_eq!(status, DriverStatus::Stopped);
        assert_eq!(scheduler.counters().finished, 3);
        assert_eq!(scheduler.tracker().count_in(TaskState::Finished), 3);
        assert!(scheduler.framework_id().is_some());
        for id in ["1", "2", "3"] {
            assert!(dir.path().join(format!("{id}.out")).exists());
        }
    }

    #[test]
    fn zero_offer_interval_is_clamped() {
        let cluster = LocalCluster::new(
            AgentInventory::with_default_agent(),
            PayloadExecutor::new(std::env::temp_dir()),
        )
        .with_offer_interval(Duration::ZERO);
        assert_eq!(cluster.offer_interval(), MIN_OFFER_INTERVAL);
    }

    #[tokio::test]
    async fn run_with_zero_offer_interval_completes() {
        let dir = tempfile::tempdir().unwrap();
        let info = executor_info("http://127.0.0.1:1/flotilla-exec", "./flotilla-exec");
        let mut scheduler = OfferScheduler::new(&cluster_config(2), info).unwrap();

        let cluster = LocalCluster::new(
            AgentInventory::with_default_agent(),
            PayloadExecutor::new(dir.path()),
        )
        .with_framework_name("batch")
        .with_offer_interval(Duration::ZERO);

        let status = tokio::time::timeout(Duration::from_secs(10), cluster.run(&mut scheduler))
            .await
            .expect("run did not complete");

        assert_eq!(status, DriverStatus::Stopped);
        assert_eq!(scheduler.counters().finished, 2);
    }
}
