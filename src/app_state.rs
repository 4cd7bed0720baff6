//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::ConnectionRegistry;
use crate::service::{ChatService, StreamingRelay};

/// Per-request and per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Longest message accepted by the REST chat endpoint, in characters.
    pub max_message_chars: usize,
    /// Prior turns kept per WebSocket connection (0 disables context).
    pub history_max_turns: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 1000,
            history_max_turns: 20,
        }
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Chat service for all completion calls.
    pub chat_service: Arc<ChatService>,
    /// Request limits.
    pub limits: SessionLimits,
}

impl AppState {
    /// Creates state with an empty registry.
    #[must_use]
    pub fn new(chat_service: Arc<ChatService>, limits: SessionLimits) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            chat_service,
            limits,
        }
    }

    /// A streaming relay over this state's registry and chat service.
    #[must_use]
    pub fn relay(&self) -> StreamingRelay {
        StreamingRelay::new(Arc::clone(&self.registry), Arc::clone(&self.chat_service))
    }
}
