/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Offer and task value types.
//!
//! Three types model the three sides of one placement decision:
//!
//! ```text
//! transport ──► ResourceOffer ─┐
//!                              ├─(matcher)──► TaskPlacement ──(driver.launch)──► agent
//! controller ─► TaskDemand ────┘
//! ```
//!
//! # Ownership model
//! `ResourceOffer` and `TaskDemand` are transient values: the transport moves
//! offers into the controller, the controller lends them to the matcher for
//! one call, and nothing retains them afterwards.  `TaskPlacement` is created
//! by the matcher and moved into the driver's launch call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Identities ────────────────────────────────────────────────────────────────

/// Defines a string-backed identity newtype.
///
/// Equality, ordering and hashing are by the wrapped string only.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identity of one resource offer, assigned by the transport.
    OfferId
);
define_id!(
    /// Identity of the worker node (agent) that owns an offer.
    NodeId
);
define_id!(
    /// Identity of a launched task, unique within one scheduler run.
    TaskId
);
define_id!(
    /// Identity of the executor that runs tasks on a node.
    ExecutorId
);
define_id!(
    /// Identity the transport assigned to this framework on registration.
    FrameworkId
);

// ── Resources ─────────────────────────────────────────────────────────────────

/// Well-known scalar resource names.
pub const CPUS: &str = "cpus";
pub const MEM: &str = "mem";

/// A bag of named scalar resources (`"cpus" → 2.0`, `"mem" → 1024.0`).
///
/// `BTreeMap` (not `HashMap`) so iteration order is always alphabetical:
/// log lines and placement order stay deterministic.  A resource that is not
/// present counts as `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, f64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, quantity: f64) -> Self {
        self.0.insert(name.into(), quantity);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, quantity: f64) {
        self.0.insert(name.into(), quantity);
    }

    /// Quantity of `name`, `0.0` when absent.
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first resource of `required` that does not fit into
    /// `self`, as `(name, required, available)`.
    ///
    /// Exact `<=` comparison, no epsilon.
    pub fn first_shortfall<'a>(&self, required: &'a Resources) -> Option<(&'a str, f64, f64)> {
        required
            .iter()
            .map(|(name, need)| (name, need, self.get(name)))
            .find(|(_, need, have)| !(need <= have))
    }

    /// `true` if every quantity in `required` is `<=` the matching quantity
    /// here.
    pub fn contains(&self, required: &Resources) -> bool {
        self.first_shortfall(required).is_none()
    }

    /// Subtract `other` in place.  Callers check [`contains`](Self::contains)
    /// first; quantities are not clamped.
    pub fn subtract(&mut self, other: &Resources) {
        for (name, quantity) in other.iter() {
            *self.0.entry(name.to_string()).or_insert(0.0) -= quantity;
        }
    }

    /// Add `other` in place.
    pub fn add(&mut self, other: &Resources) {
        for (name, quantity) in other.iter() {
            *self.0.entry(name.to_string()).or_insert(0.0) += quantity;
        }
    }

    /// Overlay `other` on top of `self`: entries of `other` replace entries
    /// of the same name.
    pub fn overlay(&self, other: &Resources) -> Resources {
        let mut merged = self.clone();
        for (name, quantity) in other.iter() {
            merged.insert(name, quantity);
        }
        merged
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, quantity) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}:{quantity}")?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ── ResourceOffer ─────────────────────────────────────────────────────────────

/// A time-boxed grant of capacity from one node.
///
/// Immutable once received; the matcher works on a copy of `resources` and
/// hands back the remainder as a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOffer {
    pub id: OfferId,
    pub node_id: NodeId,
    /// Hostname of the offering node, informational only.
    #[serde(default)]
    pub hostname: String,
    pub resources: Resources,
}

impl ResourceOffer {
    pub fn new(id: impl Into<OfferId>, node_id: impl Into<NodeId>, resources: Resources) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            hostname: String::new(),
            resources,
        }
    }

    /// Convenience accessor for the `cpus` scalar.
    pub fn cpus(&self) -> f64 {
        self.resources.get(CPUS)
    }

    /// Convenience accessor for the `mem` scalar.
    pub fn mem(&self) -> f64 {
        self.resources.get(MEM)
    }
}

/// Offers are equal when their identities are equal.
impl PartialEq for ResourceOffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ── TaskDemand ────────────────────────────────────────────────────────────────

/// A [`TaskDemand`] was built with a quantity that is not strictly positive.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid demand: resource '{resource}' requires {quantity}, must be > 0")]
pub struct InvalidDemand {
    pub resource: String,
    pub quantity: f64,
}

/// One unit of pending work.
///
/// Invariant: every value in `required` is finite and `> 0`, enforced by
/// [`TaskDemand::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDemand {
    required: Resources,
    payload: Vec<u8>,
}

impl TaskDemand {
    /// # Errors
    /// [`InvalidDemand`] if any quantity is `<= 0`, NaN or infinite.
    pub fn new(required: Resources, payload: impl Into<Vec<u8>>) -> Result<Self, InvalidDemand> {
        if let Some((name, quantity)) = required
            .iter()
            .find(|(_, q)| !(q.is_finite() && *q > 0.0))
        {
            return Err(InvalidDemand {
                resource: name.to_string(),
                quantity,
            });
        }
        Ok(Self {
            required,
            payload: payload.into(),
        })
    }

    pub fn required(&self) -> &Resources {
        &self.required
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

// ── TaskPlacement ─────────────────────────────────────────────────────────────

/// Binding of one demand to one offer, with the resources reserved from it.
///
/// Produced by the matcher, consumed by [`SchedulerDriver::launch`].
///
/// [`SchedulerDriver::launch`]: crate::driver::SchedulerDriver::launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlacement {
    pub task_id: TaskId,
    /// Human-readable name (`flotilla-task-<id>`).
    pub name: String,
    pub node_id: NodeId,
    pub offer_id: OfferId,
    pub resources: Resources,
    pub payload: Vec<u8>,
    /// Executor the agent starts for this task.  Attached by the
    /// controller before launch; the matcher leaves it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorInfo>,
}

impl PartialEq for TaskPlacement {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}

// ── ExecutorInfo ──────────────────────────────────────────────────────────────

/// A URI the agent fetches into the executor sandbox before start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandUri {
    pub value: String,
    pub executable: bool,
}

/// How an agent starts the executor that runs placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub name: String,
    /// Shell command run inside the sandbox (`./<binary>`).
    pub command: String,
    pub uris: Vec<CommandUri>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn res(cpus: f64, mem: f64) -> Resources {
        Resources::new().with(CPUS, cpus).with(MEM, mem)
    }

    // ── Resources ─────────────────────────────────────────────────────────────

    #[test]
    fn missing_resource_counts_as_zero() {
        assert_eq!(Resources::new().get(CPUS), 0.0);
    }

    #[test]
    fn contains_uses_exact_comparison() {
        let offer = res(1.0, 512.0);
        assert!(offer.contains(&res(1.0, 512.0)), "equal quantities fit");
        assert!(!offer.contains(&res(1.0 + f64::EPSILON, 512.0)));
    }

    #[test]
    fn first_shortfall_reports_resource_and_values() {
        let offer = res(0.5, 1024.0);
        let required = res(1.0, 512.0);
        let (name, need, have) = offer.first_shortfall(&required).unwrap();
        assert_eq!(name, CPUS);
        assert_eq!(need, 1.0);
        assert_eq!(have, 0.5);
    }

    #[test]
    fn requirement_on_absent_resource_does_not_fit() {
        let offer = res(4.0, 4096.0);
        assert!(!offer.contains(&Resources::new().with("gpus", 1.0)));
    }

    #[test]
    fn subtract_and_add_are_inverse() {
        let mut r = res(2.0, 1024.0);
        r.subtract(&res(1.0, 512.0));
        assert_eq!(r, res(1.0, 512.0));
        r.add(&res(1.0, 512.0));
        assert_eq!(r, res(2.0, 1024.0));
    }

    #[test]
    fn overlay_replaces_matching_entries_only() {
        let base = res(1.0, 128.0);
        let merged = base.overlay(&Resources::new().with(MEM, 512.0).with("disk", 10.0));
        assert_eq!(merged.get(CPUS), 1.0);
        assert_eq!(merged.get(MEM), 512.0);
        assert_eq!(merged.get("disk"), 10.0);
    }

    #[test]
    fn display_is_sorted_by_name() {
        assert_eq!(res(2.0, 64.0).to_string(), "cpus:2, mem:64");
    }

    // ── TaskDemand ────────────────────────────────────────────────────────────

    #[test]
    fn demand_accepts_positive_quantities() {
        let d = TaskDemand::new(res(1.0, 128.0), b"payload".to_vec()).unwrap();
        assert_eq!(d.required().get(MEM), 128.0);
        assert_eq!(d.payload(), b"payload");
    }

    #[test]
    fn demand_rejects_zero_quantity() {
        let err = TaskDemand::new(res(0.0, 128.0), Vec::new()).unwrap_err();
        assert_eq!(err.resource, CPUS);
        assert_eq!(err.quantity, 0.0);
    }

    #[test]
    fn demand_rejects_negative_and_nan() {
        assert!(TaskDemand::new(res(1.0, -1.0), Vec::new()).is_err());
        assert!(TaskDemand::new(res(f64::NAN, 1.0), Vec::new()).is_err());
    }

    // ── Identity equality ─────────────────────────────────────────────────────

    #[test]
    fn offers_compare_by_identity() {
        let a = ResourceOffer::new("o1", "n1", res(1.0, 1.0));
        let b = ResourceOffer::new("o1", "n2", res(8.0, 8.0));
        let c = ResourceOffer::new("o2", "n1", res(1.0, 1.0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
