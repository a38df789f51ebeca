/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Resource matcher: decides how many pending demands fit on one offer.
//!
//! [`match_offer`] is a pure function.  It walks the pending queue in FIFO
//! order, reserves each demand's resources from a running remainder of the
//! offer, and stops at the first demand that does not fit.  The result is a
//! list of [`TaskPlacement`]s bound to the offer plus the unused remainder.
//!
//! # Policy
//!
//! | Topic | Behaviour |
//! |---|---|
//! | Order | Strict FIFO; no reordering, no skipping to a smaller demand |
//! | Fit test | Exact `required <= remaining` per resource, no epsilon |
//! | Scope | One offer per call; a placement never spans two offers |
//! | Cap | At most `limits.cap` placements per call |
//! | Errors | Malformed input returns `Err`, never a partial list |
//!
//! Stopping at the first non-fitting demand leaves capacity unused when a
//! smaller demand sits behind a larger one.  Changing that is a behaviour
//! change for every caller and must not be done silently.
//!
//! # Example
//! ```rust
//! use flotilla_sched::matcher::{match_offer, MatchLimits};
//! use flotilla_sched::offer::{Resources, ResourceOffer, TaskDemand, CPUS, MEM};
//!
//! let per_task = Resources::new().with(CPUS, 1.0).with(MEM, 512.0);
//! let pending: Vec<TaskDemand> = (0..3)
//!     .map(|_| TaskDemand::new(per_task.clone(), b"work".to_vec()).unwrap())
//!     .collect();
//! let offer = ResourceOffer::new(
//!     "o1",
//!     "n1",
//!     Resources::new().with(CPUS, 2.0).with(MEM, 1024.0),
//! );
//!
//! let outcome = match_offer(&offer, &pending, &per_task, MatchLimits::new(3, 1)).unwrap();
//! assert_eq!(outcome.placements.len(), 2);
//! assert_eq!(outcome.remaining.cpus(), 0.0);
//! ```

pub mod error;

pub use error::{MatchError, StopReason};

use tracing::debug;

use crate::offer::{ResourceOffer, Resources, TaskDemand, TaskId, TaskPlacement};

// ── Inputs / outputs ──────────────────────────────────────────────────────────

/// Per-call limits supplied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchLimits {
    /// Maximum number of placements this call may produce
    /// (`total_requested - launched`).
    pub cap: usize,

    /// Sequence number given to the first placement; subsequent placements
    /// count up from it.
    pub first_task_seq: u64,
}

impl MatchLimits {
    pub fn new(cap: usize, first_task_seq: u64) -> Self {
        Self {
            cap,
            first_task_seq,
        }
    }
}

/// Result of matching one offer.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Placements in FIFO order of the demands they consumed.
    pub placements: Vec<TaskPlacement>,

    /// The offer with every placement's resources subtracted.
    pub remaining: ResourceOffer,

    /// Why matching stopped.
    pub stop: StopReason,
}

/// Name given to the task with launch sequence number `seq`.
pub fn task_name(seq: u64) -> String {
    format!("flotilla-task-{seq}")
}

// ── Public entry point ────────────────────────────────────────────────────────

/// Match `pending` demands against `offer`.
///
/// Each demand's effective requirement is `per_task` overlaid with the
/// demand's own quantities (a demand value replaces the template value of
/// the same resource).  The first `placements.len()` demands of `pending` are
/// the ones consumed; the caller removes them from its queue.
///
/// # Errors
/// [`MatchError`] if an offer quantity is negative or non-finite, or if a
/// `per_task` quantity is not `> 0`.
pub fn match_offer<'a, I>(
    offer: &ResourceOffer,
    pending: I,
    per_task: &Resources,
    limits: MatchLimits,
) -> Result<MatchOutcome, MatchError>
where
    I: IntoIterator<Item = &'a TaskDemand>,
{
    validate_offer(offer)?;
    validate_requirement(per_task)?;

    let mut remaining = offer.resources.clone();
    let mut placements: Vec<TaskPlacement> = Vec::new();
    let mut demands = pending.into_iter();

    let stop = loop {
        if placements.len() >= limits.cap {
            break StopReason::CapReached { cap: limits.cap };
        }
        let Some(demand) = demands.next() else {
            break StopReason::QueueExhausted;
        };

        let need = per_task.overlay(demand.required());
        if let Some((resource, required, available)) = remaining.first_shortfall(&need) {
            break StopReason::Insufficient {
                resource: resource.to_string(),
                required,
                available,
            };
        }

        remaining.subtract(&need);

        let seq = limits.first_task_seq + placements.len() as u64;
        debug!(
            offer = %offer.id,
            node  = %offer.node_id,
            task  = seq,
            reserved = %need,
            remaining = %remaining,
            "demand fits"
        );

        placements.push(TaskPlacement {
            task_id: TaskId::new(seq.to_string()),
            name: task_name(seq),
            node_id: offer.node_id.clone(),
            offer_id: offer.id.clone(),
            resources: need,
            payload: demand.payload().to_vec(),
            executor: None,
        });
    };

    Ok(MatchOutcome {
        placements,
        remaining: ResourceOffer {
            resources: remaining,
            ..offer.clone()
        },
        stop,
    })
}

// ── Validation ────────────────────────────────────────────────────────────────

fn validate_offer(offer: &ResourceOffer) -> Result<(), MatchError> {
    match offer
        .resources
        .iter()
        .find(|(_, q)| !(q.is_finite() && *q >= 0.0))
    {
        Some((resource, quantity)) => Err(MatchError::InvalidOfferQuantity {
            offer: offer.id.clone(),
            resource: resource.to_string(),
            quantity,
        }),
        None => Ok(()),
    }
}

fn validate_requirement(per_task: &Resources) -> Result<(), MatchError> {
    match per_task
        .iter()
        .find(|(_, q)| !(q.is_finite() && *q > 0.0))
    {
        Some((resource, quantity)) => Err(MatchError::InvalidRequirement {
            resource: resource.to_string(),
            quantity,
        }),
        None => Ok(()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
