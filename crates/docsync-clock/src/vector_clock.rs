//! Vector clocks keyed by actor.
//!
//! Entries absent from a clock read as 0. Zero entries are never stored, so
//! `{"A": 0}` and `{}` are the same clock and compare equal.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity whose edits are independently sequenced.
pub type ActorId = String;

/// Result of comparing two clocks in the causal partial order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Both clocks hold the same counters.
    Equal,
    /// Self is strictly behind the other clock.
    Before,
    /// Self is strictly ahead of the other clock.
    After,
    /// Each clock has seen something the other has not.
    Concurrent,
}

/// Mapping from actor to the highest sequence number incorporated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<ActorId, u64>", into = "BTreeMap<ActorId, u64>")]
pub struct VectorClock {
    entries: BTreeMap<ActorId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    /// Create a clock from `(actor, seq)` pairs. Zero counters are dropped
    /// and a repeated actor keeps its highest counter.
    pub fn from_entries<A: Into<ActorId>>(entries: impl IntoIterator<Item = (A, u64)>) -> Self {
        let mut clock = VectorClock::new();
        for (actor, seq) in entries {
            clock.observe(actor, seq);
        }
        clock
    }

    /// Get the counter for an actor (0 if absent).
    pub fn get(&self, actor: &str) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    /// Set the counter for an actor, overwriting whatever was there.
    pub fn set(&mut self, actor: impl Into<ActorId>, seq: u64) {
        let actor = actor.into();
        if seq == 0 {
            self.entries.remove(&actor);
        } else {
            self.entries.insert(actor, seq);
        }
    }

    /// Raise the counter for an actor to at least `seq`.
    pub fn observe(&mut self, actor: impl Into<ActorId>, seq: u64) {
        if seq == 0 {
            return;
        }
        let current = self.entries.entry(actor.into()).or_insert(0);
        *current = (*current).max(seq);
    }

    /// Increment the counter for an actor, returning the new value.
    pub fn increment(&mut self, actor: impl Into<ActorId>) -> u64 {
        let entry = self.entries.entry(actor.into()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Merge another clock into this one (pointwise max).
    pub fn merge(&mut self, other: &VectorClock) {
        for (actor, &seq) in &other.entries {
            self.observe(actor.clone(), seq);
        }
    }

    /// Merged copy, leaving self untouched.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// `self ≤ other`: every counter in self is covered by other.
    pub fn less_or_equal(&self, other: &VectorClock) -> bool {
        self.entries
            .iter()
            .all(|(actor, &seq)| seq <= other.get(actor))
    }

    /// Compare two clocks in the causal partial order.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        match (self.less_or_equal(other), other.less_or_equal(self)) {
            (true, true) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (false, false) => ClockOrdering::Concurrent,
        }
    }

    /// Neither clock dominates the other.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Check whether `(actor, seq)` has been incorporated.
    pub fn contains(&self, actor: &str, seq: u64) -> bool {
        self.get(actor) >= seq
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<ActorId, u64>> for VectorClock {
    fn from(entries: BTreeMap<ActorId, u64>) -> Self {
        VectorClock::from_entries(entries)
    }
}

impl From<VectorClock> for BTreeMap<ActorId, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.entries
    }
}

impl<A: Into<ActorId>> FromIterator<(A, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (A, u64)>>(iter: I) -> Self {
        VectorClock::from_entries(iter)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (actor, seq)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", actor, seq)?;
        }
        write!(f, "}}")
    }
}

impl Lattice for VectorClock {
    fn bottom() -> Self {
        VectorClock::new()
    }

    fn join(&self, other: &Self) -> Self {
        self.merged_with(other)
    }

    fn join_assign(&mut self, other: &Self) {
        self.merge(other);
    }
}

/// Pointwise maximum of two clocks.
pub fn merge(a: &VectorClock, b: &VectorClock) -> VectorClock {
    a.merged_with(b)
}

/// Partial-order test: `a ≤ b`.
pub fn less_or_equal(a: &VectorClock, b: &VectorClock) -> bool {
    a.less_or_equal(b)
}
