//! Application-supplied key that groups connections into a conversation.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Conversation key labelling zero or more connections.
///
/// Keys are opaque to the gateway: any non-empty string the client sends as
/// `conversation_id` is accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Wraps a raw key. Returns `None` for empty or whitespace-only input.
    #[must_use]
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
