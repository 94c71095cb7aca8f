//! The external pieces a connection drives: document backend, document
//! store and outbound transport.

use crate::message::{DocumentId, Message};
use async_trait::async_trait;
use docsync_clock::VectorClock;
use tokio::sync::mpsc;

/// The CRDT engine behind a document.
///
/// The connection never looks inside documents or changes; it only asks the
/// backend for clocks and change sets.
pub trait DocumentBackend: Send + Sync + 'static {
    /// A document value, including whatever backend state it carries.
    type Document: Clone + Send + Sync + 'static;
    /// An opaque unit of mutation.
    type Change: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// An empty document, used when changes arrive for a document we lack.
    fn init(&self) -> Self::Document;

    /// The document's clock, or `None` if the document is not a live,
    /// synchronizable state (e.g. a historical snapshot).
    fn current_clock(&self, doc: &Self::Document) -> Option<VectorClock>;

    /// Apply a batch in order. Must tolerate changes it has already seen.
    fn apply_changes(
        &self,
        doc: &Self::Document,
        changes: &[Self::Change],
    ) -> Result<Self::Document, Self::Error>;

    /// Changes in `doc` not yet reflected in `peer_clock`, in causal order.
    fn missing_changes(&self, doc: &Self::Document, peer_clock: &VectorClock) -> Vec<Self::Change>;
}

/// Durable home of documents, keyed by id.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Document: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, id: &DocumentId) -> Result<Option<Self::Document>, Self::Error>;

    async fn set(&self, id: &DocumentId, doc: Self::Document) -> Result<(), Self::Error>;
}

/// Fire-and-forget outbound transport.
///
/// Delivery, ordering and deduplication are not assumed.
pub trait MessageSink<C>: Send + Sync {
    fn send(&self, message: Message<C>);
}

impl<C, F> MessageSink<C> for F
where
    F: Fn(Message<C>) + Send + Sync,
{
    fn send(&self, message: Message<C>) {
        self(message)
    }
}

/// Sink that forwards into a tokio channel.
pub struct ChannelSink<C> {
    tx: mpsc::UnboundedSender<Message<C>>,
}

impl<C> Clone for ChannelSink<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> ChannelSink<C> {
    pub fn new(tx: mpsc::UnboundedSender<Message<C>>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<C: Send> MessageSink<C> for ChannelSink<C> {
    fn send(&self, message: Message<C>) {
        // A closed channel is a torn-down link; the message is simply lost.
        let _ = self.tx.send(message);
    }
}
