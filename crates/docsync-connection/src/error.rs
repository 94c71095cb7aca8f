//! Error types for the connection layer.

use crate::message::DocumentId;
use thiserror::Error;

/// Boxed error from an external collaborator (backend or store).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while validating an inbound message.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message has an empty documentId")]
    EmptyDocumentId,

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a [`Connection`](crate::Connection).
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The document state has no clock, e.g. a historical snapshot.
    #[error("not a connection-capable document state: {document_id}")]
    Usage { document_id: DocumentId },

    /// The document state is behind what was already reported to the peer.
    #[error("cannot pass an old state object to a connection: {document_id}")]
    StaleState { document_id: DocumentId },

    #[error("document backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("document store error: {0}")]
    Store(#[source] BoxError),

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] MessageError),
}

impl ConnectionError {
    pub(crate) fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConnectionError::Backend(Box::new(err))
    }

    pub(crate) fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConnectionError::Store(Box::new(err))
    }

    /// Caused by the caller's input; retrying with the same input fails again.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ConnectionError::Usage { .. }
                | ConnectionError::StaleState { .. }
                | ConnectionError::InvalidMessage(_)
        )
    }
}

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
