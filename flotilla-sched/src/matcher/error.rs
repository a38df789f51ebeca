/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Outcome and error types for the resource matcher.
//!
//! Two types model the two ways a match call ends:
//!
//! * [`StopReason`]: why the matcher stopped consuming demands from an offer
//!   (normal termination, carries exact resource values).
//! * [`MatchError`]: the inputs violated the matcher's contract; no
//!   placements are returned at all.
//!
//! **Do not** fold `StopReason` into `MatchError`: running out of room on an
//! offer is the expected end of every match, not a failure.

use thiserror::Error;

use crate::offer::OfferId;

// ── Stop reasons ──────────────────────────────────────────────────────────────

/// Why the matcher stopped placing demands on an offer.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Every pending demand was placed.
    QueueExhausted,

    /// The controller's launch cap was reached.
    CapReached { cap: usize },

    /// The next demand in FIFO order did not fit.  Later (possibly smaller)
    /// demands are not considered.
    Insufficient {
        resource: String,
        required: f64,
        available: f64,
    },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::QueueExhausted => write!(f, "pending queue exhausted"),

            StopReason::CapReached { cap } => write!(f, "launch cap of {} reached", cap),

            StopReason::Insufficient {
                resource,
                required,
                available,
            } => write!(
                f,
                "next demand needs {} {} but only {} remain",
                required, resource, available
            ),
        }
    }
}

// ── Contract violations ───────────────────────────────────────────────────────

/// Malformed input to [`match_offer`](super::match_offer).
#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    /// An offer quantity is negative, NaN or infinite.
    #[error("offer '{offer}' carries invalid quantity {quantity} for resource '{resource}'")]
    InvalidOfferQuantity {
        offer: OfferId,
        resource: String,
        quantity: f64,
    },

    /// The per-task requirement template has a quantity that is not `> 0`.
    #[error("per-task requirement for '{resource}' is {quantity}, must be > 0")]
    InvalidRequirement { resource: String, quantity: f64 },
}
