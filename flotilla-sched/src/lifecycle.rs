/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task lifecycle tracking.
//!
//! [`LifecycleTracker`] owns one [`TaskRecord`] per task id and applies
//! asynchronous [`TaskStatus`] updates to it.  It is deliberately lenient:
//!
//! * an update for an unknown task id creates a record instead of failing
//!   (replays after a restart, late duplicates);
//! * no transition is validated; out-of-order arrivals are accepted and the
//!   last write wins on `state` and `last_update`;
//! * records are never deleted during a run, so a re-delivered terminal
//!   update can always be recognised as a duplicate by the caller via
//!   [`RecordOutcome::previous`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::offer::{NodeId, TaskId, TaskPlacement};

// ── TaskState ─────────────────────────────────────────────────────────────────

/// Lifecycle phase of a launched task as reported by the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Staging,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    /// `true` for states after which the task never runs again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }

    /// Upper-case wire name (`TASK_RUNNING`), used in log lines.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

// ── TaskStatus ────────────────────────────────────────────────────────────────

/// One status update delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
    /// Node that reported the update, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Free-form detail (failure reason, result digest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskStatus {
    /// Status stamped with the current time.
    pub fn now(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            timestamp: Utc::now(),
            node_id: None,
            message: None,
        }
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ── TaskRecord ────────────────────────────────────────────────────────────────

/// How a record came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    /// Created when this scheduler launched the task.
    Launched,
    /// Created lazily from a status update for a task id this run never
    /// launched.
    Unsolicited,
}

/// Per-task state retained for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    pub last_update: DateTime<Utc>,
    pub node_id: Option<NodeId>,
    pub origin: RecordOrigin,
    /// Set the first time a launched task is recorded as Finished; never
    /// cleared by later updates.
    pub finish_counted: bool,
}

/// Result of applying one status update.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// State before the update; `None` if the record was just created.
    pub previous: Option<TaskState>,
    /// The record after the update.
    pub record: TaskRecord,
    /// This update is the first Finished recorded for a launched task.
    pub first_finish: bool,
}

impl RecordOutcome {
    /// `true` when a task this run launched has just reached
    /// [`TaskState::Finished`] for the first time.
    ///
    /// Re-delivered Finished updates return `false` even when a stale
    /// update moved the record out of Finished in between.  Updates for
    /// unsolicited records always return `false`.
    pub fn newly_finished(&self) -> bool {
        self.first_finish
    }
}

// ── LifecycleTracker ──────────────────────────────────────────────────────────

/// Table of [`TaskRecord`]s keyed by task id.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    records: HashMap<TaskId, TaskRecord>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) the record for a task that is about to be launched.
    ///
    /// An existing unsolicited record with the same id is replaced: a launch
    /// always starts a fresh `Staging` record.
    pub fn register_launch(&mut self, placement: &TaskPlacement) -> &TaskRecord {
        let record = TaskRecord {
            task_id: placement.task_id.clone(),
            state: TaskState::Staging,
            last_update: Utc::now(),
            node_id: Some(placement.node_id.clone()),
            origin: RecordOrigin::Launched,
            finish_counted: false,
        };
        self.records.insert(placement.task_id.clone(), record);
        &self.records[&placement.task_id]
    }

    /// Apply `status` to its record, creating the record if unknown.
    pub fn record(&mut self, status: &TaskStatus) -> RecordOutcome {
        match self.records.get_mut(&status.task_id) {
            Some(record) => {
                let previous = record.state;
                record.state = status.state;
                record.last_update = status.timestamp;
                if status.node_id.is_some() {
                    record.node_id = status.node_id.clone();
                }
                let first_finish = status.state == TaskState::Finished
                    && record.origin == RecordOrigin::Launched
                    && !record.finish_counted;
                if first_finish {
                    record.finish_counted = true;
                }
                RecordOutcome {
                    previous: Some(previous),
                    record: record.clone(),
                    first_finish,
                }
            }
            None => {
                let record = TaskRecord {
                    task_id: status.task_id.clone(),
                    state: status.state,
                    last_update: status.timestamp,
                    node_id: status.node_id.clone(),
                    origin: RecordOrigin::Unsolicited,
                    finish_counted: false,
                };
                self.records.insert(status.task_id.clone(), record.clone());
                RecordOutcome {
                    previous: None,
                    record,
                    first_finish: false,
                }
            }
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of launched tasks that have not reached a terminal state, sorted.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .records
            .values()
            .filter(|r| r.origin == RecordOrigin::Launched && !r.state.is_terminal())
            .map(|r| r.task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Active tasks last seen on `node_id`, sorted.
    pub fn active_on_node(&self, node_id: &NodeId) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .records
            .values()
            .filter(|r| {
                r.origin == RecordOrigin::Launched
                    && !r.state.is_terminal()
                    && r.node_id.as_ref() == Some(node_id)
            })
            .map(|r| r.task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of records currently in `state`.
    pub fn count_in(&self, state: TaskState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::{OfferId, Resources};
    use chrono::Duration;

    fn placement(id: &str, node: &str) -> TaskPlacement {
        TaskPlacement {
            task_id: TaskId::new(id),
            name: format!("flotilla-task-{id}"),
            node_id: NodeId::new(node),
            offer_id: OfferId::new("o1"),
            resources: Resources::new(),
            payload: Vec::new(),
            executor: None,
        }
    }

    fn status(id: &str, state: TaskState) -> TaskStatus {
        TaskStatus::now(TaskId::new(id), state)
    }

    // ── TaskState ─────────────────────────────────────────────────────────────

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Staging.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(TaskState::Running.to_string(), "TASK_RUNNING");
    }

    // ── record ────────────────────────────────────────────────────────────────

    #[test]
    fn launch_creates_staging_record() {
        let mut t = LifecycleTracker::new();
        let r = t.register_launch(&placement("1", "n1"));
        assert_eq!(r.state, TaskState::Staging);
        assert_eq!(r.origin, RecordOrigin::Launched);
        assert_eq!(r.node_id, Some(NodeId::new("n1")));
    }

    #[test]
    fn update_reports_previous_state() {
        let mut t = LifecycleTracker::new();
        t.register_launch(&placement("1", "n1"));
        let out = t.record(&status("1", TaskState::Running));
        assert_eq!(out.previous, Some(TaskState::Staging));
        assert_eq!(out.record.state, TaskState::Running);
        assert!(!out.newly_finished());
    }

    #[test]
    fn unknown_task_creates_record_without_error() {
        let mut t = LifecycleTracker::new();
        let out = t.record(&status("ghost", TaskState::Running));
        assert_eq!(out.previous, None);
        assert_eq!(out.record.origin, RecordOrigin::Unsolicited);
        assert_eq!(t.get(&TaskId::new("ghost")).unwrap().state, TaskState::Running);
    }

    #[test]
    fn duplicate_finished_is_newly_finished_only_once() {
        let mut t = LifecycleTracker::new();
        t.register_launch(&placement("1", "n1"));
        assert!(t.record(&status("1", TaskState::Finished)).newly_finished());
        assert!(!t.record(&status("1", TaskState::Finished)).newly_finished());
    }

    #[test]
    fn finished_after_stale_running_is_not_counted_again() {
        let mut t = LifecycleTracker::new();
        t.register_launch(&placement("1", "n1"));
        let finished = status("1", TaskState::Finished);
        assert!(t.record(&finished).newly_finished());
        t.record(&status("1", TaskState::Running));
        assert!(!t.record(&finished).newly_finished());
        assert!(t.get(&TaskId::new("1")).unwrap().finish_counted);
    }

    #[test]
    fn unsolicited_finished_is_never_newly_finished() {
        let mut t = LifecycleTracker::new();
        assert!(!t.record(&status("9", TaskState::Finished)).newly_finished());
        assert!(!t.record(&status("9", TaskState::Finished)).newly_finished());
    }

    #[test]
    fn launch_replaces_unsolicited_record() {
        let mut t = LifecycleTracker::new();
        t.record(&status("1", TaskState::Finished));
        t.register_launch(&placement("1", "n1"));
        let out = t.record(&status("1", TaskState::Finished));
        assert!(out.newly_finished(), "stale replay must not mask the real finish");
    }

    #[test]
    fn out_of_order_updates_last_write_wins() {
        let mut t = LifecycleTracker::new();
        t.register_launch(&placement("1", "n1"));
        let finished = status("1", TaskState::Finished);
        let mut running = status("1", TaskState::Running);
        running.timestamp = finished.timestamp - Duration::seconds(5);

        t.record(&finished);
        let out = t.record(&running);
        assert_eq!(out.previous, Some(TaskState::Finished));
        assert_eq!(out.record.state, TaskState::Running);
        assert_eq!(out.record.last_update, running.timestamp);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    #[test]
    fn active_tasks_exclude_terminal_and_unsolicited() {
        let mut t = LifecycleTracker::new();
        t.register_launch(&placement("1", "n1"));
        t.register_launch(&placement("2", "n2"));
        t.register_launch(&placement("3", "n1"));
        t.record(&status("3", TaskState::Failed));
        t.record(&status("4", TaskState::Running));

        assert_eq!(t.active_tasks(), vec![TaskId::new("1"), TaskId::new("2")]);
        assert_eq!(t.active_on_node(&NodeId::new("n1")), vec![TaskId::new("1")]);
        assert_eq!(t.count_in(TaskState::Staging), 2);
        assert_eq!(t.len(), 4);
    }
}
