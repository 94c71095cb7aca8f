//! Messages exchanged between two connected peers.
//!
//! On the wire a message is a flat JSON object:
//!
//! ```text
//! { "documentId": "<string>", "clock": { "<actor>": <seq>, ... }, "changes": [ ... ] }
//! ```
//!
//! `changes` is optional. Inbound messages are validated into a [`Message`]
//! before the connection looks at them.

use crate::error::MessageError;
use docsync_clock::VectorClock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of a document; scope of all per-document connection state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a message carries besides the clock.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody<C> {
    /// Clock only: "this is what I have".
    Announce,
    /// A contiguous, causally ordered batch to apply in order.
    Changes(Vec<C>),
}

/// A validated protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "WireMessage<C>",
    into = "WireMessage<C>",
    bound(serialize = "C: Clone + Serialize", deserialize = "C: DeserializeOwned")
)]
pub struct Message<C> {
    pub document_id: DocumentId,
    /// Sender's full knowledge for the document. Always set on messages we
    /// produce; tolerated as missing on inbound messages.
    pub clock: Option<VectorClock>,
    pub body: MessageBody<C>,
}

impl<C> Message<C> {
    /// A clock-only message.
    pub fn announce(document_id: DocumentId, clock: VectorClock) -> Self {
        Message {
            document_id,
            clock: Some(clock),
            body: MessageBody::Announce,
        }
    }

    /// A message carrying changes. An empty batch degrades to an announcement.
    pub fn with_changes(document_id: DocumentId, clock: VectorClock, changes: Vec<C>) -> Self {
        let body = if changes.is_empty() {
            MessageBody::Announce
        } else {
            MessageBody::Changes(changes)
        };
        Message {
            document_id,
            clock: Some(clock),
            body,
        }
    }

    /// The attached changes, if any.
    pub fn changes(&self) -> Option<&[C]> {
        match &self.body {
            MessageBody::Announce => None,
            MessageBody::Changes(changes) => Some(changes),
        }
    }

    pub fn has_changes(&self) -> bool {
        matches!(self.body, MessageBody::Changes(_))
    }
}

impl<C: Serialize + Clone> Message<C> {
    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<C: DeserializeOwned> Message<C> {
    /// Decode and validate a wire message.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let wire: WireMessage<C> = serde_json::from_str(json)?;
        Message::try_from(wire)
    }
}

/// The unvalidated JSON shape of a message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage<C> {
    pub document_id: String,
    pub clock: Option<VectorClock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<C>>,
}

impl<C> TryFrom<WireMessage<C>> for Message<C> {
    type Error = MessageError;

    fn try_from(wire: WireMessage<C>) -> Result<Self, Self::Error> {
        if wire.document_id.is_empty() {
            return Err(MessageError::EmptyDocumentId);
        }
        let body = match wire.changes {
            Some(changes) if !changes.is_empty() => MessageBody::Changes(changes),
            _ => MessageBody::Announce,
        };
        Ok(Message {
            document_id: DocumentId(wire.document_id),
            clock: wire.clock,
            body,
        })
    }
}

impl<C> From<Message<C>> for WireMessage<C> {
    fn from(msg: Message<C>) -> Self {
        let changes = match msg.body {
            MessageBody::Announce => None,
            MessageBody::Changes(changes) => Some(changes),
        };
        WireMessage {
            document_id: msg.document_id.0,
            clock: Some(msg.clock.unwrap_or_default()),
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_announce_wire_shape() {
        let msg: Message<u32> = Message::announce(
            DocumentId::new("D"),
            VectorClock::from_entries([("A", 3)]),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"documentId": "D", "clock": {"A": 3}}));
    }

    #[test]
    fn test_empty_clock_is_still_sent() {
        let msg: Message<u32> = Message::announce(DocumentId::new("D"), VectorClock::new());
        assert_eq!(msg.to_json().unwrap(), r#"{"documentId":"D","clock":{}}"#);
    }

    #[test]
    fn test_changes_wire_shape() {
        let msg = Message::with_changes(
            DocumentId::new("D"),
            VectorClock::from_entries([("A", 2)]),
            vec![10u32, 20],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"documentId": "D", "clock": {"A": 2}, "changes": [10, 20]})
        );
    }

    #[test]
    fn test_empty_change_batch_is_announcement() {
        let msg: Message<u32> =
            Message::with_changes(DocumentId::new("D"), VectorClock::new(), Vec::new());
        assert!(!msg.has_changes());

        let parsed: Message<u32> =
            Message::from_json(r#"{"documentId":"D","clock":{},"changes":[]}"#).unwrap();
        assert_eq!(parsed.body, MessageBody::Announce);
        assert!(parsed.changes().is_none());
    }

    #[test]
    fn test_missing_clock_is_tolerated() {
        let parsed: Message<u32> = Message::from_json(r#"{"documentId":"D"}"#).unwrap();
        assert_eq!(parsed.clock, None);
    }

    #[test]
    fn test_rejects_empty_document_id() {
        let err = Message::<u32>::from_json(r#"{"documentId":"","clock":{}}"#).unwrap_err();
        assert!(matches!(err, MessageError::EmptyDocumentId));
    }

    #[test]
    fn test_rejects_malformed_clock() {
        let err = Message::<u32>::from_json(r#"{"documentId":"D","clock":{"A":-1}}"#).unwrap_err();
        assert!(matches!(err, MessageError::Json(_)));
    }
}
