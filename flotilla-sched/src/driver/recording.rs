/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! A [`SchedulerDriver`] that records every command instead of sending it.
//!
//! Used by unit tests, the integration tests and the `scenario-sim` tool.
//! Individual commands can be made to fail to exercise the controller's
//! error paths.

use std::fmt;

use super::{DriverError, DriverStatus, Filters, SchedulerDriver};
use crate::lifecycle::TaskStatus;
use crate::offer::{OfferId, TaskId, TaskPlacement};

/// One recorded driver command.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Launch {
        offer_ids: Vec<OfferId>,
        placements: Vec<TaskPlacement>,
        filters: Filters,
    },
    Decline {
        offer_ids: Vec<OfferId>,
        filters: Filters,
    },
    Kill(TaskId),
    Acknowledge(TaskStatus),
    Stop {
        graceful: bool,
    },
}

impl DriverCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DriverCommand::Launch { .. } => "launch",
            DriverCommand::Decline { .. } => "decline",
            DriverCommand::Kill(_) => "kill",
            DriverCommand::Acknowledge(_) => "acknowledge",
            DriverCommand::Stop { .. } => "stop",
        }
    }
}

impl fmt::Display for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverCommand::Launch {
                offer_ids,
                placements,
                filters,
            } => {
                let tasks: Vec<&str> = placements.iter().map(|p| p.task_id.as_str()).collect();
                write!(
                    f,
                    "launch offers={:?} tasks={:?} refuse={}s",
                    offer_ids.iter().map(OfferId::as_str).collect::<Vec<_>>(),
                    tasks,
                    filters.refuse_seconds
                )
            }
            DriverCommand::Decline { offer_ids, filters } => write!(
                f,
                "decline offers={:?} refuse={}s",
                offer_ids.iter().map(OfferId::as_str).collect::<Vec<_>>(),
                filters.refuse_seconds
            ),
            DriverCommand::Kill(id) => write!(f, "kill task={id}"),
            DriverCommand::Acknowledge(s) => write!(f, "ack task={} state={}", s.task_id, s.state),
            DriverCommand::Stop { graceful } => write!(f, "stop graceful={graceful}"),
        }
    }
}

/// Records commands; optionally fails the next command of a given kind.
#[derive(Debug)]
pub struct RecordingDriver {
    commands: Vec<DriverCommand>,
    status: DriverStatus,
    fail_next: Option<&'static str>,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            status: DriverStatus::Running,
            fail_next: None,
        }
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next command named `command` (`"launch"`, `"decline"`, …)
    /// fail with [`DriverError::CommandFailed`].  The failed command is not
    /// recorded.
    pub fn fail_next(&mut self, command: &'static str) {
        self.fail_next = Some(command);
    }

    pub fn commands(&self) -> &[DriverCommand] {
        &self.commands
    }

    /// Drain and return the recorded commands.
    pub fn take(&mut self) -> Vec<DriverCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    pub fn launches(&self) -> impl Iterator<Item = &DriverCommand> {
        self.commands
            .iter()
            .filter(|c| matches!(c, DriverCommand::Launch { .. }))
    }

    pub fn launched_placements(&self) -> Vec<&TaskPlacement> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DriverCommand::Launch { placements, .. } => Some(placements.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn declined_offers(&self) -> Vec<&OfferId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DriverCommand::Decline { offer_ids, .. } => Some(offer_ids.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DriverCommand::Stop { .. }))
            .count()
    }

    fn push(&mut self, command: DriverCommand) -> Result<DriverStatus, DriverError> {
        if self.status != DriverStatus::Running {
            return Err(DriverError::NotRunning(self.status));
        }
        if self.fail_next == Some(command.name()) {
            self.fail_next = None;
            return Err(DriverError::CommandFailed {
                command: command.name(),
                reason: "injected failure".to_string(),
            });
        }
        if let DriverCommand::Stop { .. } = command {
            self.status = DriverStatus::Stopped;
        }
        self.commands.push(command);
        Ok(self.status)
    }
}

impl SchedulerDriver for RecordingDriver {
    fn launch(
        &mut self,
        offer_ids: &[OfferId],
        placements: Vec<TaskPlacement>,
        filters: Filters,
    ) -> Result<DriverStatus, DriverError> {
        self.push(DriverCommand::Launch {
            offer_ids: offer_ids.to_vec(),
            placements,
            filters,
        })
    }

    fn decline(
        &mut self,
        offer_ids: &[OfferId],
        filters: Filters,
    ) -> Result<DriverStatus, DriverError> {
        self.push(DriverCommand::Decline {
            offer_ids: offer_ids.to_vec(),
            filters,
        })
    }

    fn kill(&mut self, task_id: &TaskId) -> Result<DriverStatus, DriverError> {
        self.push(DriverCommand::Kill(task_id.clone()))
    }

    fn acknowledge_status(&mut self, status: &TaskStatus) -> Result<DriverStatus, DriverError> {
        self.push(DriverCommand::Acknowledge(status.clone()))
    }

    fn stop(&mut self, graceful: bool) -> Result<DriverStatus, DriverError> {
        self.push(DriverCommand::Stop { graceful })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_in_order() {
        let mut d = RecordingDriver::new();
        d.decline(&[OfferId::new("o1")], Filters::default()).unwrap();
        d.kill(&TaskId::new("3")).unwrap();
        let names: Vec<_> = d.commands().iter().map(DriverCommand::name).collect();
        assert_eq!(names, vec!["decline", "kill"]);
        assert_eq!(d.declined_offers(), vec![&OfferId::new("o1")]);
    }

    #[test]
    fn injected_failure_applies_once() {
        let mut d = RecordingDriver::new();
        d.fail_next("decline");
        assert!(matches!(
            d.decline(&[OfferId::new("o1")], Filters::default()),
            Err(DriverError::CommandFailed { command: "decline", .. })
        ));
        assert!(d.decline(&[OfferId::new("o1")], Filters::default()).is_ok());
        assert_eq!(d.commands().len(), 1);
    }

    #[test]
    fn commands_after_stop_are_rejected() {
        let mut d = RecordingDriver::new();
        assert_eq!(d.stop(true).unwrap(), DriverStatus::Stopped);
        assert_eq!(
            d.kill(&TaskId::new("1")),
            Err(DriverError::NotRunning(DriverStatus::Stopped))
        );
        assert_eq!(d.stop_count(), 1);
    }
}
