//! Opaque identifier minted for every accepted connection.
//!
//! [`ConnectionId`] wraps a random UUID v4 so that connection keys cannot
//! be confused with conversation keys or any other UUID in the system.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a live connection.
///
/// Generated once at accept time by [`super::ConnectionRegistry::register`]
/// and never reused. It is the only key the registry accepts for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Mints a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
