//! The per-peer connection.
//!
//! A connection multiplexes any number of documents over one link to one
//! peer. Its only state is a [`ClockTable`]; every decision to send changes,
//! announce a clock, or request a document is re-derived from comparing the
//! backend's current clock with that table.
//!
//! # Decision procedure
//!
//! ```text
//! on local change or inbound announcement for d (document held):
//!   clock = backend.current_clock(doc)
//!   if theirs[d] known and missing = backend.missing_changes(doc, theirs[d]) non-empty:
//!       theirs[d] ⊔= clock; send (d, clock, missing)
//!   else if clock != ours[d]:
//!       send (d, clock)
//!
//! on inbound announcement for d (document not held, ours[d] absent):
//!   send (d, {})            // request everything
//! ```

use crate::clock_table::ClockTable;
use crate::collaborators::{DocumentBackend, DocumentStore, MessageSink};
use crate::error::{ConnectionError, Result};
use crate::message::{DocumentId, Message, MessageBody};
use docsync_clock::VectorClock;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

/// Clock bookkeeping and send/request decisions for one peer link.
///
/// Operations are serialized: each one holds the clock table for its whole
/// duration, including the document fetch, so a send decision is never made
/// against a clock another operation has already moved past.
pub struct Connection<B, S, T>
where
    B: DocumentBackend,
    S: DocumentStore<Document = B::Document>,
    T: MessageSink<B::Change>,
{
    backend: Arc<B>,
    store: Arc<S>,
    sink: T,
    clocks: Mutex<ClockTable>,
}

impl<B, S, T> Connection<B, S, T>
where
    B: DocumentBackend,
    S: DocumentStore<Document = B::Document>,
    T: MessageSink<B::Change>,
{
    /// Create a connection with empty clock tables.
    pub fn new(backend: Arc<B>, store: Arc<S>, sink: T) -> Self {
        Self {
            backend,
            store,
            sink,
            clocks: Mutex::new(ClockTable::new()),
        }
    }

    /// Highest clock we have reported to the peer for `id`.
    pub async fn our_clock(&self, id: &DocumentId) -> Option<VectorClock> {
        self.clocks.lock().await.ours(id).cloned()
    }

    /// Highest clock the peer has reported to us for `id`.
    pub async fn their_clock(&self, id: &DocumentId) -> Option<VectorClock> {
        self.clocks.lock().await.theirs(id).cloned()
    }

    /// Tell the connection that `doc` may have advanced locally.
    ///
    /// Fails with [`ConnectionError::Usage`] if `doc` has no clock and with
    /// [`ConnectionError::StaleState`] if it is behind what was already
    /// reported to the peer.
    #[instrument(level = "debug", skip(self, id, doc), fields(document_id = %id))]
    pub async fn notify_local_change(&self, id: &DocumentId, doc: &B::Document) -> Result<()> {
        let mut clocks = self.clocks.lock().await;

        let clock = self.backend.current_clock(doc).ok_or_else(|| {
            warn!("document state has no clock");
            ConnectionError::Usage {
                document_id: id.clone(),
            }
        })?;

        let reported = clocks.ours_or_empty(id);
        if !reported.less_or_equal(&clock) {
            warn!(%reported, %clock, "document state is older than what the peer was told");
            return Err(ConnectionError::StaleState {
                document_id: id.clone(),
            });
        }

        let current = match self.store.get(id).await.map_err(ConnectionError::store)? {
            Some(stored) => stored,
            None => doc.clone(),
        };
        self.maybe_send_changes(&mut clocks, id, &current)
    }

    /// Handle an inbound message.
    ///
    /// Returns the document held for the message's id after handling, if any.
    /// If the stored document has no clock (a snapshot was stored in place
    /// of a live state) the announcement path fails with
    /// [`ConnectionError::Usage`].
    #[instrument(level = "debug", skip(self, msg), fields(document_id = %msg.document_id))]
    pub async fn receive_message(&self, msg: Message<B::Change>) -> Result<Option<B::Document>> {
        let mut clocks = self.clocks.lock().await;
        let Message {
            document_id: id,
            clock,
            body,
        } = msg;

        if let Some(clock) = &clock {
            clocks.merge_theirs(&id, clock);
            trace!(%clock, "merged peer clock");
        }

        if let MessageBody::Changes(changes) = body {
            let doc = self.apply_changes(&id, &changes).await?;
            return Ok(Some(doc));
        }

        match self.store.get(&id).await.map_err(ConnectionError::store)? {
            Some(doc) => {
                self.maybe_send_changes(&mut clocks, &id, &doc)?;
                Ok(Some(doc))
            }
            None => {
                if !clocks.has_ours(&id) {
                    debug!("requesting unknown document from peer");
                    self.send_message(&mut clocks, &id, VectorClock::new(), None);
                }
                Ok(None)
            }
        }
    }

    async fn apply_changes(&self, id: &DocumentId, changes: &[B::Change]) -> Result<B::Document> {
        let prior = match self.store.get(id).await.map_err(ConnectionError::store)? {
            Some(doc) => doc,
            None => self.backend.init(),
        };
        let doc = self
            .backend
            .apply_changes(&prior, changes)
            .map_err(ConnectionError::backend)?;
        self.store
            .set(id, doc.clone())
            .await
            .map_err(ConnectionError::store)?;
        debug!(count = changes.len(), "applied remote changes");
        Ok(doc)
    }

    fn maybe_send_changes(
        &self,
        clocks: &mut ClockTable,
        id: &DocumentId,
        doc: &B::Document,
    ) -> Result<()> {
        let clock = self
            .backend
            .current_clock(doc)
            .ok_or_else(|| ConnectionError::Usage {
                document_id: id.clone(),
            })?;

        if let Some(theirs) = clocks.theirs(id) {
            let changes = self.backend.missing_changes(doc, theirs);
            if !changes.is_empty() {
                debug!(count = changes.len(), %clock, "sending missing changes");
                clocks.merge_theirs(id, &clock);
                self.send_message(clocks, id, clock, Some(changes));
                return Ok(());
            }
        }

        if clock != clocks.ours_or_empty(id) {
            debug!(%clock, "announcing clock");
            self.send_message(clocks, id, clock, None);
        } else {
            trace!("no progress to report");
        }
        Ok(())
    }

    fn send_message(
        &self,
        clocks: &mut ClockTable,
        id: &DocumentId,
        clock: VectorClock,
        changes: Option<Vec<B::Change>>,
    ) {
        clocks.merge_ours(id, &clock);
        let message = match changes {
            Some(changes) => Message::with_changes(id.clone(), clock, changes),
            None => Message::announce(id.clone(), clock),
        };
        self.sink.send(message);
    }
}

impl<B, S, T> Connection<B, S, T>
where
    B: DocumentBackend,
    B::Change: DeserializeOwned,
    S: DocumentStore<Document = B::Document>,
    T: MessageSink<B::Change>,
{
    /// Decode, validate and handle a JSON wire message.
    pub async fn receive_json(&self, json: &str) -> Result<Option<B::Document>> {
        let msg = Message::from_json(json).map_err(|err| {
            warn!(error = %err, "rejected inbound message");
            ConnectionError::from(err)
        })?;
        self.receive_message(msg).await
    }
}
