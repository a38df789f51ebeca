/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduling controller: the stateful [`Scheduler`] the transport drives.
//!
//! [`OfferScheduler`] owns the run counters, the pending demand queue and the
//! [`LifecycleTracker`].  On every offer batch it runs the matcher once per
//! offer and launches the resulting placements; on every status update it
//! advances the lifecycle table and, once every requested task has finished,
//! stops the driver exactly once.
//!
//! # State machine
//!
//! ```text
//!            resource_offers                    status_update(Finished)
//! Placing ───────────────────► Placing / Capped ─────────────────────────► Complete
//!   │ launched < total            launched == total      finished == total   │
//!   │                              (offers declined)                          │
//!   └──── every offer batch declined after Complete ◄─────────────────────────┘
//! ```
//!
//! Invariant at every observation point:
//! `0 <= finished <= launched <= total_requested`.
//!
//! All entry points take `&mut self`; the transport serialises callbacks, so
//! no locking is needed.  A transport that dispatches callbacks from several
//! threads must wrap the whole `OfferScheduler` in one mutex.

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use crate::config::{ErrorPolicy, FrameworkConfig};
use crate::driver::{DriverError, Filters, MasterInfo, Scheduler, SchedulerDriver};
use crate::lifecycle::{LifecycleTracker, RecordOutcome, TaskState, TaskStatus};
use crate::matcher::{match_offer, MatchLimits, StopReason};
use crate::offer::{
    ExecutorId, ExecutorInfo, FrameworkId, InvalidDemand, NodeId, OfferId, ResourceOffer,
    Resources, TaskDemand, TaskId,
};

// ── RunCounters ───────────────────────────────────────────────────────────────

/// Run-wide progress counters, owned solely by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCounters {
    pub launched: usize,
    pub finished: usize,
    pub total_requested: usize,
}

impl RunCounters {
    fn new(total_requested: usize) -> Self {
        Self {
            launched: 0,
            finished: 0,
            total_requested,
        }
    }

    /// `finished <= launched <= total_requested`.
    pub fn holds(&self) -> bool {
        self.finished <= self.launched && self.launched <= self.total_requested
    }

    /// Placements still allowed before the cap.
    pub fn remaining_cap(&self) -> usize {
        self.total_requested.saturating_sub(self.launched)
    }

    pub fn is_capped(&self) -> bool {
        self.launched >= self.total_requested
    }

    pub fn is_complete(&self) -> bool {
        self.finished >= self.total_requested
    }
}

// ── OfferScheduler ────────────────────────────────────────────────────────────

/// The scheduling controller.
#[derive(Debug)]
pub struct OfferScheduler {
    name: String,
    executor: ExecutorInfo,
    per_task: Resources,
    filters: Filters,
    on_error: ErrorPolicy,

    pending: VecDeque<TaskDemand>,
    counters: RunCounters,
    tracker: LifecycleTracker,

    framework_id: Option<FrameworkId>,
    stop_requested: bool,
    errors: Vec<String>,
}

impl OfferScheduler {
    /// Build a controller with `config.total_tasks` homogeneous demands
    /// queued.  Every demand carries the artifact server address as payload.
    ///
    /// # Errors
    /// [`InvalidDemand`] if the per-task resources are not `> 0`.
    pub fn new(config: &FrameworkConfig, executor: ExecutorInfo) -> Result<Self, InvalidDemand> {
        let per_task = config.per_task_resources();
        let payload = config.artifact_server_address.as_bytes().to_vec();
        let total = config.total_tasks as usize;

        let pending = (0..total)
            .map(|_| TaskDemand::new(per_task.clone(), payload.clone()))
            .collect::<Result<VecDeque<_>, _>>()?;

        info!(
            name        = %config.name,
            total_tasks = total,
            per_task    = %per_task,
            executor    = %executor.executor_id,
            "offer scheduler created"
        );

        Ok(Self {
            name: config.name.clone(),
            executor,
            per_task,
            filters: Filters::refuse_for(config.refuse_seconds),
            on_error: config.on_error,
            pending,
            counters: RunCounters::new(total),
            tracker: LifecycleTracker::new(),
            framework_id: None,
            stop_requested: false,
            errors: Vec::new(),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Framework name from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &ExecutorInfo {
        &self.executor
    }

    pub fn framework_id(&self) -> Option<&FrameworkId> {
        self.framework_id.as_ref()
    }

    /// Transport error messages received so far, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_complete(&self) -> bool {
        self.counters.is_complete()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    // ── Offer handling ────────────────────────────────────────────────────────

    fn decline_all(&self, driver: &mut dyn SchedulerDriver, offers: &[ResourceOffer]) {
        if offers.is_empty() {
            return;
        }
        let ids: Vec<OfferId> = offers.iter().map(|o| o.id.clone()).collect();
        if let Err(e) = driver.decline(&ids, self.filters) {
            report_driver_failure("decline", &e);
        }
    }

    /// Match one offer and launch (or decline) it.
    fn place_on_offer(&mut self, driver: &mut dyn SchedulerDriver, offer: ResourceOffer) {
        let limits = MatchLimits::new(
            self.counters.remaining_cap(),
            self.counters.launched as u64 + 1,
        );

        let outcome = match match_offer(&offer, &self.pending, &self.per_task, limits) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(offer = %offer.id, error = %e, "offer rejected by matcher, declining");
                self.decline_all(driver, std::slice::from_ref(&offer));
                return;
            }
        };

        if outcome.placements.is_empty() {
            debug!(
                offer  = %offer.id,
                node   = %offer.node_id,
                reason = %outcome.stop,
                "no placement fits, declining"
            );
            self.decline_all(driver, std::slice::from_ref(&offer));
            return;
        }

        let mut placements = outcome.placements;
        for placement in &mut placements {
            placement.executor = Some(self.executor.clone());
            self.pending.pop_front();
            self.counters.launched += 1;
            self.tracker.register_launch(placement);
            debug!(
                task = %placement.task_id,
                name = %placement.name,
                offer = %offer.id,
                "prepared task for launch"
            );
        }
        debug_assert!(self.counters.holds(), "{:?}", self.counters);

        info!(
            offer     = %offer.id,
            node      = %offer.node_id,
            placed    = placements.len(),
            launched  = self.counters.launched,
            total     = self.counters.total_requested,
            remaining = %outcome.remaining.resources,
            "launching tasks"
        );
        if let StopReason::Insufficient { .. } = outcome.stop {
            debug!(offer = %offer.id, reason = %outcome.stop, "offer exhausted");
        }

        if let Err(e) = driver.launch(&[offer.id.clone()], placements, self.filters) {
            report_driver_failure("launch", &e);
        }
    }

    // ── Status handling ───────────────────────────────────────────────────────

    fn apply_status(&mut self, status: &TaskStatus) -> RecordOutcome {
        let outcome = self.tracker.record(status);
        if outcome.newly_finished() {
            self.counters.finished += 1;
        }
        debug_assert!(self.counters.holds(), "{:?}", self.counters);
        outcome
    }

    fn stop_once(&mut self, driver: &mut dyn SchedulerDriver, graceful: bool) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        if let Err(e) = driver.stop(graceful) {
            report_driver_failure("stop", &e);
        }
    }

    /// Kill every task that has not reached a terminal state.
    pub fn kill_active(&mut self, driver: &mut dyn SchedulerDriver) -> usize {
        let active = self.tracker.active_tasks();
        for task_id in &active {
            info!(task = %task_id, "killing task");
            if let Err(e) = driver.kill(task_id) {
                report_driver_failure("kill", &e);
            }
        }
        active.len()
    }
}

fn report_driver_failure(command: &'static str, e: &DriverError) {
    error!(command, error = %e, "driver command failed, next offer/update cycle retries");
}

// ── Scheduler callbacks ───────────────────────────────────────────────────────

impl Scheduler for OfferScheduler {
    fn registered(
        &mut self,
        _driver: &mut dyn SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    ) {
        info!(
            framework = %framework_id,
            name      = %self.name,
            master    = %master,
            "scheduler registered with master"
        );
        self.framework_id = Some(framework_id.clone());
    }

    fn reregistered(&mut self, _driver: &mut dyn SchedulerDriver, master: &MasterInfo) {
        info!(master = %master, "scheduler re-registered with master");
    }

    fn disconnected(&mut self, _driver: &mut dyn SchedulerDriver) {
        warn!("scheduler disconnected, waiting for re-registration");
    }

    fn resource_offers(&mut self, driver: &mut dyn SchedulerDriver, offers: Vec<ResourceOffer>) {
        for offer in &offers {
            debug!(
                offer = %offer.id,
                node  = %offer.node_id,
                host  = %offer.hostname,
                resources = %offer.resources,
                "received offer"
            );
        }

        if self.counters.is_capped() || self.stop_requested {
            debug!(
                count = offers.len(),
                launched = self.counters.launched,
                total = self.counters.total_requested,
                "all tasks launched, declining offers"
            );
            self.decline_all(driver, &offers);
            return;
        }

        for offer in offers {
            self.place_on_offer(driver, offer);
        }
    }

    fn offer_rescinded(&mut self, _driver: &mut dyn SchedulerDriver, offer_id: &OfferId) {
        info!(offer = %offer_id, "offer rescinded");
    }

    fn status_update(&mut self, driver: &mut dyn SchedulerDriver, status: TaskStatus) {
        let outcome = self.apply_status(&status);

        match outcome.previous {
            None => warn!(
                task  = %status.task_id,
                state = %status.state,
                "status update for unknown task, record created"
            ),
            Some(prev) => info!(
                task     = %status.task_id,
                state    = %status.state,
                previous = %prev,
                finished = self.counters.finished,
                total    = self.counters.total_requested,
                "status update"
            ),
        }
        if matches!(status.state, TaskState::Failed | TaskState::Lost) {
            warn!(
                task    = %status.task_id,
                state   = %status.state,
                detail  = status.message.as_deref().unwrap_or(""),
                "task did not finish"
            );
        }

        if let Err(e) = driver.acknowledge_status(&status) {
            report_driver_failure("acknowledge", &e);
        }

        if self.counters.is_complete() && !self.stop_requested {
            info!(
                finished = self.counters.finished,
                "all tasks finished, stopping driver"
            );
            self.stop_once(driver, true);
        }
    }

    fn framework_message(
        &mut self,
        _driver: &mut dyn SchedulerDriver,
        executor_id: &ExecutorId,
        node_id: &NodeId,
        message: &[u8],
    ) {
        info!(
            executor = %executor_id,
            node     = %node_id,
            data     = %String::from_utf8_lossy(message),
            "framework message"
        );
    }

    fn slave_lost(&mut self, _driver: &mut dyn SchedulerDriver, node_id: &NodeId) {
        let affected: Vec<TaskId> = self.tracker.active_on_node(node_id);
        warn!(node = %node_id, active_tasks = ?affected, "agent lost");
    }

    fn executor_lost(
        &mut self,
        _driver: &mut dyn SchedulerDriver,
        executor_id: &ExecutorId,
        node_id: &NodeId,
        exit_code: i32,
    ) {
        let affected: Vec<TaskId> = self.tracker.active_on_node(node_id);
        warn!(
            executor  = %executor_id,
            node      = %node_id,
            exit_code = exit_code,
            active_tasks = ?affected,
            "executor lost"
        );
    }

    fn error(&mut self, driver: &mut dyn SchedulerDriver, message: &str) {
        error!(reason = message, policy = ?self.on_error, "scheduler received error");
        self.errors.push(message.to_string());

        if self.on_error == ErrorPolicy::Abort {
            let killed = self.kill_active(driver);
            warn!(killed, "aborting run after transport error");
            self.stop_once(driver, false);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
