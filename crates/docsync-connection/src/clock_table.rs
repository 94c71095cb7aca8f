//! Per-document clock bookkeeping for one connection.

use crate::message::DocumentId;
use docsync_clock::VectorClock;
use std::collections::HashMap;

/// What each side of a connection is known to have, per document.
///
/// `ours[d]` is the join of every clock we have sent for `d`; `theirs[d]` is
/// the join of every clock the peer has sent us. A missing entry means no
/// clock has been exchanged yet, which is not the same as an empty clock.
/// Entries only ever grow.
#[derive(Clone, Debug, Default)]
pub struct ClockTable {
    ours: HashMap<DocumentId, VectorClock>,
    theirs: HashMap<DocumentId, VectorClock>,
}

impl ClockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that we reported `clock` for `id`.
    pub fn merge_ours(&mut self, id: &DocumentId, clock: &VectorClock) {
        Self::union(&mut self.ours, id, clock);
    }

    /// Record that the peer reported (or will shortly have) `clock` for `id`.
    pub fn merge_theirs(&mut self, id: &DocumentId, clock: &VectorClock) {
        Self::union(&mut self.theirs, id, clock);
    }

    pub fn ours(&self, id: &DocumentId) -> Option<&VectorClock> {
        self.ours.get(id)
    }

    pub fn theirs(&self, id: &DocumentId) -> Option<&VectorClock> {
        self.theirs.get(id)
    }

    pub fn has_ours(&self, id: &DocumentId) -> bool {
        self.ours.contains_key(id)
    }

    /// Our reported clock, reading a missing entry as the empty clock.
    pub fn ours_or_empty(&self, id: &DocumentId) -> VectorClock {
        self.ours.get(id).cloned().unwrap_or_default()
    }

    fn union(table: &mut HashMap<DocumentId, VectorClock>, id: &DocumentId, clock: &VectorClock) {
        table.entry(id.clone()).or_default().merge(clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id)
    }

    #[test]
    fn test_absent_differs_from_empty() {
        let mut table = ClockTable::new();
        assert!(table.theirs(&doc("D")).is_none());
        assert_eq!(table.ours_or_empty(&doc("D")), VectorClock::new());

        table.merge_theirs(&doc("D"), &VectorClock::new());
        assert!(table.theirs(&doc("D")).is_some());
        assert_eq!(table.theirs(&doc("D")), Some(&VectorClock::new()));
        assert!(!table.has_ours(&doc("D")));
    }

    #[test]
    fn test_merge_never_regresses() {
        let mut table = ClockTable::new();
        table.merge_ours(&doc("D"), &VectorClock::from_entries([("A", 3), ("B", 1)]));
        table.merge_ours(&doc("D"), &VectorClock::from_entries([("A", 1), ("C", 2)]));

        assert_eq!(
            table.ours(&doc("D")),
            Some(&VectorClock::from_entries([("A", 3), ("B", 1), ("C", 2)]))
        );
    }

    #[test]
    fn test_repeated_merge_is_noop() {
        let mut table = ClockTable::new();
        let clock = VectorClock::from_entries([("A", 2)]);
        table.merge_theirs(&doc("D"), &clock);
        table.merge_theirs(&doc("D"), &clock);
        assert_eq!(table.theirs(&doc("D")), Some(&clock));
    }

    #[test]
    fn test_documents_are_independent() {
        let mut table = ClockTable::new();
        table.merge_ours(&doc("D1"), &VectorClock::from_entries([("A", 1)]));
        table.merge_theirs(&doc("D2"), &VectorClock::from_entries([("B", 1)]));
        table.merge_theirs(&doc("D1"), &VectorClock::new());

        assert!(table.ours(&doc("D2")).is_none());
        assert!(table.theirs(&doc("D1")).is_some());
        assert_eq!(table.ours(&doc("D1")), Some(&VectorClock::from_entries([("A", 1)])));
    }
}
