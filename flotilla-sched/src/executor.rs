/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Executor side of a placement: the pipeline that turns one
//! [`TaskPlacement`] into a sequence of status updates.
//!
//! ```text
//! Running ─► fetch ─► process ─► publish ─► ack (Finished)
//!              │         │          │         │
//!              └─────────┴──────────┴─────────┴──► Failed (stage error)
//! ```
//!
//! The pipeline reports through an [`ExecutorDriver`]; the local transport
//! hands it a channel-backed driver, the `flotilla-exec` binary one that
//! prints JSON lines.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::driver::DriverError;
use crate::lifecycle::{TaskState, TaskStatus};
use crate::offer::{ExecutorId, NodeId, TaskId, TaskPlacement};

// ── ExecutorDriver ────────────────────────────────────────────────────────────

/// Outbound surface of an executor.
pub trait ExecutorDriver: Send + Sync {
    fn send_status_update(&self, status: TaskStatus) -> Result<(), DriverError>;

    fn send_framework_message(&self, message: &[u8]) -> Result<(), DriverError>;
}

/// Event emitted by a [`ChannelExecutorDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Status(TaskStatus),
    Message {
        executor_id: ExecutorId,
        node_id: NodeId,
        data: Vec<u8>,
    },
}

/// Forwards executor output into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelExecutorDriver {
    executor_id: ExecutorId,
    node_id: NodeId,
    tx: mpsc::UnboundedSender<ExecutorEvent>,
}

impl ChannelExecutorDriver {
    pub fn new(
        executor_id: ExecutorId,
        node_id: NodeId,
        tx: mpsc::UnboundedSender<ExecutorEvent>,
    ) -> Self {
        Self {
            executor_id,
            node_id,
            tx,
        }
    }

    fn send(&self, command: &'static str, event: ExecutorEvent) -> Result<(), DriverError> {
        self.tx.send(event).map_err(|_| DriverError::CommandFailed {
            command,
            reason: "transport channel closed".to_string(),
        })
    }
}

impl ExecutorDriver for ChannelExecutorDriver {
    fn send_status_update(&self, status: TaskStatus) -> Result<(), DriverError> {
        let status = status.with_node(self.node_id.clone());
        self.send("send_status_update", ExecutorEvent::Status(status))
    }

    fn send_framework_message(&self, message: &[u8]) -> Result<(), DriverError> {
        self.send(
            "send_framework_message",
            ExecutorEvent::Message {
                executor_id: self.executor_id.clone(),
                node_id: self.node_id.clone(),
                data: message.to_vec(),
            },
        )
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A pipeline stage failed; the task ends `Failed` with this as message.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("fetch '{url}' failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("process failed: {0}")]
    Process(String),

    #[error("publish to '{path}' failed: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("status update could not be sent: {0}")]
    Ack(#[from] DriverError),
}

impl StageError {
    pub fn stage(&self) -> &'static str {
        match self {
            StageError::Fetch { .. } => "fetch",
            StageError::Process(_) => "process",
            StageError::Publish { .. } => "publish",
            StageError::Ack(_) => "ack",
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Digest of one processed work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDigest {
    pub sha256: String,
    pub size: usize,
}

impl std::fmt::Display for WorkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{} bytes={}", self.sha256, self.size)
    }
}

/// Runs the fetch → process → publish → ack pipeline for placements.
#[derive(Debug, Clone)]
pub struct PayloadExecutor {
    work_dir: PathBuf,
    client: reqwest::Client,
}

impl PayloadExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path the publish stage writes for `task_id`.
    pub fn output_path(&self, task_id: &TaskId) -> PathBuf {
        self.work_dir.join(format!("{task_id}.out"))
    }

    /// Run the pipeline for `placement`, reporting every transition to
    /// `driver`.
    ///
    /// On a stage failure a `Failed` update carrying the error is sent
    /// (best effort) and the error is returned.
    pub async fn launch_task(
        &self,
        driver: &dyn ExecutorDriver,
        placement: &TaskPlacement,
    ) -> Result<WorkDigest, StageError> {
        let task_id = placement.task_id.clone();
        info!(task = %task_id, name = %placement.name, "launching task");

        match self.run_stages(driver, placement).await {
            Ok(digest) => {
                info!(task = %task_id, digest = %digest, "task finished");
                Ok(digest)
            }
            Err(e) => {
                warn!(task = %task_id, stage = e.stage(), error = %e, "task failed");
                let failed =
                    TaskStatus::now(task_id, TaskState::Failed).with_message(e.to_string());
                if let Err(send_err) = driver.send_status_update(failed) {
                    warn!(error = %send_err, "could not report task failure");
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        driver: &dyn ExecutorDriver,
        placement: &TaskPlacement,
    ) -> Result<WorkDigest, StageError> {
        driver.send_status_update(TaskStatus::now(
            placement.task_id.clone(),
            TaskState::Running,
        ))?;

        let unit = self.fetch(&placement.payload).await?;
        let digest = process(&unit)?;
        self.publish(&placement.task_id, &digest).await?;

        driver.send_status_update(
            TaskStatus::now(placement.task_id.clone(), TaskState::Finished)
                .with_message(digest.to_string()),
        )?;
        Ok(digest)
    }

    /// A payload that reads as an http(s) URL is downloaded; anything else
    /// is the work unit itself.
    async fn fetch(&self, payload: &[u8]) -> Result<Vec<u8>, StageError> {
        let url = match std::str::from_utf8(payload) {
            Ok(s) if s.starts_with("http://") || s.starts_with("https://") => s.trim(),
            _ => {
                debug!(size = payload.len(), "using inline payload");
                return Ok(payload.to_vec());
            }
        };

        debug!(url, "fetching work unit");
        let fetched = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(response.bytes().await?)
        }
        .await;

        fetched
            .map(|body| body.to_vec())
            .map_err(|source| StageError::Fetch {
                url: url.to_string(),
                source,
            })
    }

    async fn publish(&self, task_id: &TaskId, digest: &WorkDigest) -> Result<(), StageError> {
        let path = self.output_path(task_id);
        let body = format!("{task_id} {digest}\n");
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| StageError::Publish { path, source })
    }
}

fn process(unit: &[u8]) -> Result<WorkDigest, StageError> {
    if unit.is_empty() {
        return Err(StageError::Process("work unit is empty".to_string()));
    }
    Ok(WorkDigest {
        sha256: hex::encode(Sha256::digest(unit)),
        size: unit.len(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::{OfferId, Resources};

    fn placement(id: &str, payload: &[u8]) -> TaskPlacement {
        TaskPlacement {
            task_id: TaskId::new(id),
            name: format!("flotilla-task-{id}"),
            node_id: NodeId::new("node-1"),
            offer_id: OfferId::new("o1"),
            resources: Resources::new(),
            payload: payload.to_vec(),
            executor: None,
        }
    }

    fn channel() -> (ChannelExecutorDriver, mpsc::UnboundedReceiver<ExecutorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelExecutorDriver::new(ExecutorId::new("flotilla"), NodeId::new("node-1"), tx),
            rx,
        )
    }

    fn states(rx: &mut mpsc::UnboundedReceiver<ExecutorEvent>) -> Vec<TaskState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutorEvent::Status(s) = event {
                out.push(s.state);
            }
        }
        out
    }

    #[test]
    fn process_digests_known_input() {
        let d = process(b"abc").unwrap();
        assert_eq!(
            d.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(d.size, 3);
    }

    #[test]
    fn process_rejects_empty_unit() {
        assert_eq!(process(b"").unwrap_err().stage(), "process");
    }

    #[tokio::test]
    async fn inline_payload_runs_to_finished_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let exec = PayloadExecutor::new(dir.path());
        let (driver, mut rx) = channel();

        let digest = exec
            .launch_task(&driver, &placement("7", b"my_framework"))
            .await
            .unwrap();

        assert_eq!(states(&mut rx), vec![TaskState::Running, TaskState::Finished]);
        let written = std::fs::read_to_string(dir.path().join("7.out")).unwrap();
        assert!(written.contains(&digest.sha256));
    }

    #[tokio::test]
    async fn failing_stage_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let exec = PayloadExecutor::new(dir.path());
        let (driver, mut rx) = channel();

        let err = exec
            .launch_task(&driver, &placement("1", b""))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "process");
        assert_eq!(states(&mut rx), vec![TaskState::Running, TaskState::Failed]);
        assert!(!dir.path().join("1.out").exists());
    }

    #[tokio::test]
    async fn unreachable_url_fails_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let exec = PayloadExecutor::new(dir.path());
        let (driver, mut rx) = channel();

        let err = exec
            .launch_task(&driver, &placement("2", b"http://127.0.0.1:1/flotilla-exec"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "fetch");
        assert_eq!(states(&mut rx).last(), Some(&TaskState::Failed));
    }

    #[tokio::test]
    async fn publish_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = PayloadExecutor::new(dir.path().join("missing"));
        let (driver, _rx) = channel();

        let err = exec
            .launch_task(&driver, &placement("3", b"unit"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "publish");
    }

    #[test]
    fn closed_channel_surfaces_driver_error() {
        let (driver, rx) = channel();
        drop(rx);
        let err = driver
            .send_status_update(TaskStatus::now(TaskId::new("1"), TaskState::Running))
            .unwrap_err();
        assert!(matches!(err, DriverError::CommandFailed { .. }));
    }
}
