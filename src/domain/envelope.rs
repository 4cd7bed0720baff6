//! Wire-level unit sent to connected clients.
//!
//! Every outbound frame is an [`Envelope`]: a tagged [`Payload`] plus an
//! optional conversation key. The payload is a closed union, so the `type`
//! discriminator always determines the shape of `data`:
//!
//! ```json
//! { "type": "message",
//!   "data": { "content": "Hel", "is_complete": false, "timestamp": "2026-01-01T00:00:00Z" },
//!   "conversation_id": "conv-1" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GroupKey;

/// Outbound frame: payload plus the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Kind-specific payload, serialized as `type` + `data`.
    #[serde(flatten)]
    pub payload: Payload,
    /// Conversation the frame belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<GroupKey>,
}

/// Closed set of payload shapes, one per envelope kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Connection or processing status change.
    Status(StatusData),
    /// A streamed completion fragment or the terminal marker.
    #[serde(rename = "message")]
    Content(ContentData),
    /// Human-readable failure report.
    Error(ErrorData),
    /// Reply to an application-level ping.
    Pong(PongData),
}

/// Discriminator of a [`Payload`], for callers that only need the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// [`Payload::Status`].
    Status,
    /// [`Payload::Content`].
    Content,
    /// [`Payload::Error`].
    Error,
    /// [`Payload::Pong`].
    Pong,
}

/// Status values reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The connection was accepted and registered.
    Connected,
    /// A chat message was accepted and is being relayed.
    Processing,
    /// The server is closing the connection.
    Disconnected,
}

/// `data` of a status envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    /// New status.
    pub status: ConnectionStatus,
    /// Optional explanation for humans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `data` of a content envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentData {
    /// Fragment text; empty on the terminal envelope.
    pub content: String,
    /// `true` only on the terminal envelope of a successful completion.
    pub is_complete: bool,
    /// When the fragment was relayed (ISO-8601).
    pub timestamp: DateTime<Utc>,
}

/// `data` of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable message.
    pub message: String,
}

/// `data` of a pong envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongData {
    /// When the pong was produced (ISO-8601).
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wraps a payload with an optional conversation key.
    #[must_use]
    pub fn new(payload: Payload, conversation_id: Option<GroupKey>) -> Self {
        Self {
            payload,
            conversation_id,
        }
    }

    /// A non-terminal content fragment.
    #[must_use]
    pub fn fragment(text: impl Into<String>, conversation_id: Option<GroupKey>) -> Self {
        Self::new(
            Payload::Content(ContentData {
                content: text.into(),
                is_complete: false,
                timestamp: Utc::now(),
            }),
            conversation_id,
        )
    }

    /// The terminal content envelope: empty text, `is_complete = true`.
    #[must_use]
    pub fn completion(conversation_id: Option<GroupKey>) -> Self {
        Self::new(
            Payload::Content(ContentData {
                content: String::new(),
                is_complete: true,
                timestamp: Utc::now(),
            }),
            conversation_id,
        )
    }

    /// A status envelope.
    #[must_use]
    pub fn status(
        status: ConnectionStatus,
        message: Option<String>,
        conversation_id: Option<GroupKey>,
    ) -> Self {
        Self::new(
            Payload::Status(StatusData { status, message }),
            conversation_id,
        )
    }

    /// An error envelope.
    #[must_use]
    pub fn error(message: impl Into<String>, conversation_id: Option<GroupKey>) -> Self {
        Self::new(
            Payload::Error(ErrorData {
                message: message.into(),
            }),
            conversation_id,
        )
    }

    /// A pong envelope stamped with the current time.
    #[must_use]
    pub fn pong(conversation_id: Option<GroupKey>) -> Self {
        Self::new(
            Payload::Pong(PongData {
                timestamp: Utc::now(),
            }),
            conversation_id,
        )
    }

    /// Returns the payload discriminator.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self.payload {
            Payload::Status(_) => EnvelopeKind::Status,
            Payload::Content(_) => EnvelopeKind::Content,
            Payload::Error(_) => EnvelopeKind::Error,
            Payload::Pong(_) => EnvelopeKind::Pong,
        }
    }

    /// Returns the content data if this is a content envelope.
    #[must_use]
    pub const fn as_content(&self) -> Option<&ContentData> {
        match &self.payload {
            Payload::Content(data) => Some(data),
            _ => None,
        }
    }

    /// Returns `true` for the terminal envelope of a successful completion.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.as_content().is_some_and(|c| c.is_complete)
    }

    /// Encodes the envelope as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if encoding fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn encode(envelope: &Envelope) -> serde_json::Value {
        let Ok(frame) = envelope.to_frame() else {
            panic!("encoding failed");
        };
        let Ok(value) = serde_json::from_str(&frame) else {
            panic!("frame is not JSON");
        };
        value
    }

    #[test]
    fn content_uses_message_type_on_the_wire() {
        let value = encode(&Envelope::fragment("Hel", GroupKey::parse("conv-1")));
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("message"));
        assert_eq!(
            value.get("conversation_id").and_then(|v| v.as_str()),
            Some("conv-1")
        );
        let Some(data) = value.get("data") else {
            panic!("missing data");
        };
        assert_eq!(data.get("content").and_then(|v| v.as_str()), Some("Hel"));
        assert_eq!(data.get("is_complete").and_then(|v| v.as_bool()), Some(false));
        assert!(data.get("timestamp").and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn conversation_id_is_omitted_when_absent() {
        let value = encode(&Envelope::pong(None));
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("pong"));
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn completion_is_final_and_empty() {
        let envelope = Envelope::completion(None);
        assert!(envelope.is_final());
        assert_eq!(envelope.as_content().map(|c| c.content.as_str()), Some(""));
        assert!(!Envelope::fragment("x", None).is_final());
    }

    #[test]
    fn status_payload_shape() {
        let value = encode(&Envelope::status(
            ConnectionStatus::Connected,
            Some("Successfully connected to chat server".to_string()),
            None,
        ));
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("status"));
        let status = value
            .get("data")
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_str());
        assert_eq!(status, Some("connected"));
    }

    #[test]
    fn decodes_what_it_encodes() {
        let original = Envelope::error("boom", GroupKey::parse("c"));
        let Ok(frame) = original.to_frame() else {
            panic!("encoding failed");
        };
        let Ok(decoded) = serde_json::from_str::<Envelope>(&frame) else {
            panic!("decoding failed");
        };
        assert_eq!(decoded.kind(), EnvelopeKind::Error);
        assert_eq!(decoded, original);
    }
}
