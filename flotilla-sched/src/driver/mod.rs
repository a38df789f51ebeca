/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Driver shim: the narrow boundary between the scheduler core and the
//! cluster transport.
//!
//! ```text
//!              inbound callbacks (one at a time)
//! transport ─────────────────────────────────────►  dyn Scheduler
//!     ▲                                                  │
//!     └──────────── dyn SchedulerDriver ◄────────────────┘
//!                   launch / decline / kill / ack / stop
//! ```
//!
//! The transport holds the scheduler only as `dyn Scheduler` and delivers at
//! most one callback at a time, so implementations need no internal locking.
//! Driver commands are fire-and-forget: results of a launch or kill are
//! observed later through `status_update`.

pub mod local;
pub mod recording;

use std::fmt;

use thiserror::Error;

use crate::lifecycle::TaskStatus;
use crate::offer::{ExecutorId, FrameworkId, NodeId, OfferId, ResourceOffer, TaskId, TaskPlacement};

// ── Command parameters ────────────────────────────────────────────────────────

/// Default refusal duration attached to launches and declines.
pub const DEFAULT_REFUSE_SECONDS: f64 = 1.0;

/// Filter attached to a launch or decline: how long the transport should
/// wait before re-offering the unused resources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Filters {
    pub fn refuse_for(refuse_seconds: f64) -> Self {
        Self { refuse_seconds }
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            refuse_seconds: DEFAULT_REFUSE_SECONDS,
        }
    }
}

/// Description of the master the framework registered with.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterInfo {
    pub id: String,
    pub hostname: String,
    pub port: u16,
}

impl fmt::Display for MasterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.hostname, self.port)
    }
}

/// Driver run state returned by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    NotStarted,
    Running,
    Aborted,
    Stopped,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A driver command could not be handed to the transport.
///
/// Recoverable by assumption: the next offer cycle or status update is the
/// retry mechanism, there is no explicit re-send.
#[derive(Debug, Error, PartialEq)]
pub enum DriverError {
    /// The transport refused or failed to send the command.
    #[error("driver command '{command}' failed: {reason}")]
    CommandFailed {
        command: &'static str,
        reason: String,
    },

    /// The driver was stopped or aborted; no further commands are accepted.
    #[error("driver is not running (status {0:?})")]
    NotRunning(DriverStatus),

    /// A launch or decline referenced an offer the transport does not hold.
    #[error("unknown offer '{0}'")]
    UnknownOffer(OfferId),
}

// ── Outbound: scheduler → transport ───────────────────────────────────────────

/// Commands the scheduler issues to the transport.
pub trait SchedulerDriver {
    /// Launch `placements` on the resources of `offer_ids`.  Unused
    /// resources of those offers are refused for `filters.refuse_seconds`.
    fn launch(
        &mut self,
        offer_ids: &[OfferId],
        placements: Vec<TaskPlacement>,
        filters: Filters,
    ) -> Result<DriverStatus, DriverError>;

    /// Release `offer_ids` without using them.
    fn decline(&mut self, offer_ids: &[OfferId], filters: Filters)
        -> Result<DriverStatus, DriverError>;

    /// Ask the transport to kill a task.  Completion arrives later as a
    /// `Killed` status update.
    fn kill(&mut self, task_id: &TaskId) -> Result<DriverStatus, DriverError>;

    /// Acknowledge a status update, for transports that require explicit
    /// acknowledgements.
    fn acknowledge_status(&mut self, status: &TaskStatus) -> Result<DriverStatus, DriverError>;

    /// Stop the driver.  `graceful = true` lets running tasks finish.
    fn stop(&mut self, graceful: bool) -> Result<DriverStatus, DriverError>;
}

// ── Inbound: transport → scheduler ────────────────────────────────────────────

/// Callback surface the transport invokes, one method per event.
///
/// Every method receives the driver so the scheduler can respond inline.
pub trait Scheduler: Send {
    fn registered(
        &mut self,
        driver: &mut dyn SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    );

    fn reregistered(&mut self, driver: &mut dyn SchedulerDriver, master: &MasterInfo);

    fn disconnected(&mut self, driver: &mut dyn SchedulerDriver);

    fn resource_offers(&mut self, driver: &mut dyn SchedulerDriver, offers: Vec<ResourceOffer>);

    fn offer_rescinded(&mut self, driver: &mut dyn SchedulerDriver, offer_id: &OfferId);

    fn status_update(&mut self, driver: &mut dyn SchedulerDriver, status: TaskStatus);

    fn framework_message(
        &mut self,
        driver: &mut dyn SchedulerDriver,
        executor_id: &ExecutorId,
        node_id: &NodeId,
        message: &[u8],
    );

    fn slave_lost(&mut self, driver: &mut dyn SchedulerDriver, node_id: &NodeId);

    fn executor_lost(
        &mut self,
        driver: &mut dyn SchedulerDriver,
        executor_id: &ExecutorId,
        node_id: &NodeId,
        exit_code: i32,
    );

    fn error(&mut self, driver: &mut dyn SchedulerDriver, message: &str);
}
