//! docsync connection - keeps documents in sync with one peer
//!
//! Each peer holds documents whose state is summarized by a vector clock. A
//! [`Connection`] tracks, per document, the clock we last reported to the
//! peer and the clock the peer last reported to us, and from those two
//! decides whether to push missing changes, announce progress, or ask for a
//! document it does not have.
//!
//! # Quick Start
//!
//! ```rust
//! use docsync_connection::memory::{MemoryStore, OpLogBackend, OpLogDoc};
//! use docsync_connection::{ChannelSink, Connection, DocumentId};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let (sink, mut outbox) = ChannelSink::channel();
//! let conn = Connection::new(Arc::new(OpLogBackend), store.clone(), sink);
//!
//! let id = DocumentId::new("notes");
//! let mut doc = OpLogDoc::new();
//! doc.append("alice", "hello").unwrap();
//! store.insert(id.clone(), doc.clone());
//!
//! conn.notify_local_change(&id, &doc).await.unwrap();
//! let announced = outbox.try_recv().unwrap();
//! assert_eq!(announced.clock, doc.clock().cloned());
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`clock_table`] - per-document "ours"/"theirs" clocks
//! - [`message`] - wire shape and boundary validation
//! - [`connection`] - send/receive/request decisions
//! - [`collaborators`] - document backend, store and transport traits
//! - [`memory`] - in-memory collaborators for tests and simulation
//! - [`error`] - error types

pub mod clock_table;
pub mod collaborators;
pub mod connection;
pub mod error;
pub mod memory;
pub mod message;

// Re-exports for convenience
pub use clock_table::ClockTable;
pub use collaborators::{ChannelSink, DocumentBackend, DocumentStore, MessageSink};
pub use connection::Connection;
pub use error::{BoxError, ConnectionError, MessageError, Result};
pub use message::{DocumentId, Message, MessageBody, WireMessage};

pub use docsync_clock::{ClockOrdering, Lattice, VectorClock};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collaborators::{DocumentBackend, DocumentStore, MessageSink};
    pub use crate::connection::Connection;
    pub use crate::error::ConnectionError;
    pub use crate::message::{DocumentId, Message};
    pub use docsync_clock::VectorClock;
}
