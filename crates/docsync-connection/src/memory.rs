//! In-memory collaborators for tests and simulation.
//!
//! [`OpLogBackend`] is a deliberately small CRDT: a document is a causally
//! ordered log of values appended by actors. It is enough to exercise every
//! path of the connection (duplicate batches, out-of-order batches, snapshot
//! states without a clock) without pulling in a real CRDT engine.

use crate::collaborators::{DocumentBackend, DocumentStore};
use crate::message::DocumentId;
use async_trait::async_trait;
use docsync_clock::{ActorId, VectorClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use thiserror::Error;

/// Errors from the op-log document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpLogError {
    #[error("snapshot documents are read-only")]
    Snapshot,
}

/// One appended value, stamped with its causal position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChange {
    pub actor: ActorId,
    pub seq: u64,
    /// Clock of the authoring document just before this change.
    pub deps: VectorClock,
    pub value: String,
}

impl LogChange {
    /// Ready to apply on top of `clock`.
    fn is_ready(&self, clock: &VectorClock) -> bool {
        clock.get(&self.actor) + 1 == self.seq && self.deps.less_or_equal(clock)
    }
}

/// A causally ordered log of values.
#[derive(Clone, Debug, PartialEq)]
pub struct OpLogDoc {
    /// `None` for a read-only snapshot.
    clock: Option<VectorClock>,
    log: Vec<LogChange>,
    /// Received but not yet causally ready.
    queue: Vec<LogChange>,
}

impl OpLogDoc {
    pub fn new() -> Self {
        Self {
            clock: Some(VectorClock::new()),
            log: Vec::new(),
            queue: Vec::new(),
        }
    }

    /// Append a value authored by `actor`.
    pub fn append(&mut self, actor: &str, value: impl Into<String>) -> Result<&LogChange, OpLogError> {
        let clock = self.clock.as_mut().ok_or(OpLogError::Snapshot)?;
        let deps = clock.clone();
        let seq = clock.increment(actor);
        self.log.push(LogChange {
            actor: actor.to_string(),
            seq,
            deps,
            value: value.into(),
        });
        Ok(&self.log[self.log.len() - 1])
    }

    /// A read-only view of the current values with no clock attached.
    pub fn snapshot(&self) -> OpLogDoc {
        OpLogDoc {
            clock: None,
            log: self.log.clone(),
            queue: Vec::new(),
        }
    }

    pub fn clock(&self) -> Option<&VectorClock> {
        self.clock.as_ref()
    }

    pub fn is_snapshot(&self) -> bool {
        self.clock.is_none()
    }

    pub fn values(&self) -> Vec<&str> {
        self.log.iter().map(|c| c.value.as_str()).collect()
    }

    pub fn changes(&self) -> &[LogChange] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Changes held back until their dependencies arrive.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    fn knows(&self, clock: &VectorClock, change: &LogChange) -> bool {
        clock.contains(&change.actor, change.seq)
            || self
                .queue
                .iter()
                .any(|q| q.actor == change.actor && q.seq == change.seq)
    }
}

impl Default for OpLogDoc {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend for [`OpLogDoc`].
#[derive(Clone, Debug, Default)]
pub struct OpLogBackend;

impl OpLogBackend {
    pub fn new() -> Self {
        OpLogBackend
    }
}

impl DocumentBackend for OpLogBackend {
    type Document = OpLogDoc;
    type Change = LogChange;
    type Error = OpLogError;

    fn init(&self) -> OpLogDoc {
        OpLogDoc::new()
    }

    fn current_clock(&self, doc: &OpLogDoc) -> Option<VectorClock> {
        doc.clock.clone()
    }

    fn apply_changes(&self, doc: &OpLogDoc, changes: &[LogChange]) -> Result<OpLogDoc, OpLogError> {
        let mut next = doc.clone();
        let mut clock = next.clock.take().ok_or(OpLogError::Snapshot)?;

        for change in changes {
            if !next.knows(&clock, change) {
                next.queue.push(change.clone());
            }
        }

        loop {
            let Some(pos) = next.queue.iter().position(|c| c.is_ready(&clock)) else {
                break;
            };
            let change = next.queue.remove(pos);
            clock.set(change.actor.clone(), change.seq);
            next.log.push(change);
        }

        next.clock = Some(clock);
        Ok(next)
    }

    fn missing_changes(&self, doc: &OpLogDoc, peer_clock: &VectorClock) -> Vec<LogChange> {
        doc.log
            .iter()
            .filter(|c| c.seq > peer_clock.get(&c.actor))
            .cloned()
            .collect()
    }
}

/// Shared in-memory document store.
pub struct MemoryStore<D> {
    docs: RwLock<HashMap<DocumentId, D>>,
}

impl<D> MemoryStore<D> {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        self.docs.read().keys().cloned().collect()
    }
}

impl<D: Clone> MemoryStore<D> {
    /// Synchronous read, for callers outside an async context.
    pub fn get_now(&self, id: &DocumentId) -> Option<D> {
        self.docs.read().get(id).cloned()
    }

    pub fn insert(&self, id: DocumentId, doc: D) {
        self.docs.write().insert(id, doc);
    }
}

impl<D> Default for MemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D> DocumentStore for MemoryStore<D>
where
    D: Clone + Send + Sync + 'static,
{
    type Document = D;
    type Error = Infallible;

    async fn get(&self, id: &DocumentId) -> Result<Option<D>, Infallible> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn set(&self, id: &DocumentId, doc: D) -> Result<(), Infallible> {
        self.docs.write().insert(id.clone(), doc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_advances_clock() {
        let mut doc = OpLogDoc::new();
        doc.append("A", "one").unwrap();
        doc.append("A", "two").unwrap();

        assert_eq!(doc.clock(), Some(&VectorClock::from_entries([("A", 2)])));
        assert_eq!(doc.values(), vec!["one", "two"]);
        assert_eq!(doc.changes()[1].deps, VectorClock::from_entries([("A", 1)]));
    }

    #[test]
    fn test_snapshot_has_no_clock() {
        let mut doc = OpLogDoc::new();
        doc.append("A", "one").unwrap();
        let mut snap = doc.snapshot();

        assert!(snap.is_snapshot());
        assert_eq!(OpLogBackend.current_clock(&snap), None);
        assert_eq!(snap.append("A", "two").unwrap_err(), OpLogError::Snapshot);
        assert_eq!(
            OpLogBackend.apply_changes(&snap, &[]).unwrap_err(),
            OpLogError::Snapshot
        );
    }

    #[test]
    fn test_apply_is_duplicate_tolerant() {
        let mut source = OpLogDoc::new();
        source.append("A", "x").unwrap();
        source.append("A", "y").unwrap();
        let batch = source.changes().to_vec();

        let once = OpLogBackend.apply_changes(&OpLogDoc::new(), &batch).unwrap();
        let twice = OpLogBackend.apply_changes(&once, &batch).unwrap();

        assert_eq!(once.values(), vec!["x", "y"]);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_apply_buffers_until_causally_ready() {
        let mut source = OpLogDoc::new();
        source.append("A", "first").unwrap();
        source.append("A", "second").unwrap();
        let first = source.changes()[0].clone();
        let second = source.changes()[1].clone();

        let doc = OpLogBackend
            .apply_changes(&OpLogDoc::new(), &[second])
            .unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.pending_len(), 1);

        let doc = OpLogBackend.apply_changes(&doc, &[first]).unwrap();
        assert_eq!(doc.values(), vec!["first", "second"]);
        assert_eq!(doc.pending_len(), 0);
    }

    #[test]
    fn test_cross_actor_dependencies() {
        let mut a = OpLogDoc::new();
        a.append("A", "a1").unwrap();

        let mut b = OpLogBackend.apply_changes(&OpLogDoc::new(), a.changes()).unwrap();
        b.append("B", "b1").unwrap();

        // b1 depends on a1; delivering it alone to a fresh doc must wait.
        let b1 = b.changes()[1].clone();
        let fresh = OpLogBackend.apply_changes(&OpLogDoc::new(), &[b1]).unwrap();
        assert!(fresh.is_empty());

        let missing = OpLogBackend.missing_changes(&b, &VectorClock::new());
        let caught_up = OpLogBackend.apply_changes(&fresh, &missing).unwrap();
        assert_eq!(caught_up.values(), vec!["a1", "b1"]);
    }

    #[test]
    fn test_missing_changes_against_peer_clock() {
        let mut doc = OpLogDoc::new();
        doc.append("A", "1").unwrap();
        doc.append("A", "2").unwrap();
        doc.append("B", "3").unwrap();

        let missing = OpLogBackend.missing_changes(&doc, &VectorClock::from_entries([("A", 1)]));
        let values: Vec<_> = missing.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["2", "3"]);

        let clock = doc.clock().cloned().unwrap();
        assert!(OpLogBackend.missing_changes(&doc, &clock).is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store: MemoryStore<u32> = MemoryStore::new();
        let id = DocumentId::new("D");

        assert_eq!(store.get(&id).await.unwrap(), None);
        store.set(&id, 7).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(7));
        assert_eq!(store.get_now(&id), Some(7));
        assert_eq!(store.len(), 1);
    }
}
