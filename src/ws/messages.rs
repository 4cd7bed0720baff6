//! Inbound WebSocket frames and their decoding into commands.
//!
//! Clients send JSON text frames of the form
//! `{ "type": "message" | "ping", "message"?: string, "conversation_id"?: string }`.
//! A missing `type` means `"message"`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::GroupKey;

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Relay `message` to the model.
    Chat {
        /// User text, possibly blank.
        message: String,
        /// Conversation the message belongs to.
        conversation_id: Option<GroupKey>,
    },
    /// Application-level keep-alive.
    Ping {
        /// Conversation the ping belongs to.
        conversation_id: Option<GroupKey>,
    },
    /// A well-formed frame with an unrecognized `type`.
    Unknown {
        /// The unrecognized discriminator.
        frame_type: String,
    },
}

/// Failure to decode an inbound frame. Always recoverable.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not JSON at all.
    #[error("Invalid JSON format")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame is JSON but does not match the frame schema.
    #[error("Error processing message: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    /// The frame arrived as binary data.
    #[error("Error processing message: binary frames are not supported")]
    Binary,
}

/// Decodes one text frame.
///
/// Only `type` decides how the frame is read: fields are checked by the
/// command that uses them, and a frame whose `type` is not a known string
/// decodes to [`ClientCommand::Unknown`] whatever else it carries.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidJson`] for non-JSON input and
/// [`DecodeError::InvalidFrame`] for JSON that is not an object, or for a
/// chat frame whose `message` is not a string.
pub fn decode_frame(text: &str) -> Result<ClientCommand, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;
    let frame: Map<String, Value> =
        serde_json::from_value(value).map_err(DecodeError::InvalidFrame)?;
    let conversation_id = frame
        .get("conversation_id")
        .and_then(Value::as_str)
        .and_then(GroupKey::parse);

    let command = match frame.get("type") {
        None => chat_command(&frame, conversation_id)?,
        Some(Value::String(kind)) if kind == "message" => chat_command(&frame, conversation_id)?,
        Some(Value::String(kind)) if kind == "ping" => ClientCommand::Ping { conversation_id },
        Some(Value::String(kind)) => ClientCommand::Unknown {
            frame_type: kind.clone(),
        },
        Some(other) => ClientCommand::Unknown {
            frame_type: other.to_string(),
        },
    };
    Ok(command)
}

fn chat_command(
    frame: &Map<String, Value>,
    conversation_id: Option<GroupKey>,
) -> Result<ClientCommand, DecodeError> {
    let message = match frame.get("message") {
        None => String::new(),
        Some(raw) => String::deserialize(raw).map_err(DecodeError::InvalidFrame)?,
    };
    Ok(ClientCommand::Chat {
        message,
        conversation_id,
    })
}
