//! # chat-relay-gateway
//!
//! WebSocket and REST gateway that relays chat messages to a streaming,
//! OpenAI-compatible completion API.
//!
//! Each WebSocket connection sends chat messages; the reply is streamed
//! back fragment by fragment as JSON envelopes and closed by a final
//! `is_complete` envelope. Connections may join a conversation group so
//! replies produced through the REST endpoint reach every member.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler + Lifecycle (ws/)
//!     │
//!     ├── StreamingRelay, ChatService (service/)
//!     ├── ConnectionRegistry, Envelope (domain/)
//!     │
//!     └── CompletionProducer (producer/) ──▶ /chat/completions (SSE)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod producer;
pub mod service;
pub mod ws;

#[cfg(test)]
mod test_support;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Assembles the full application router.
///
/// `cors_origins` containing `*` (or nothing parseable) allows any origin.
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .merge(api::build_router())
        .route("/ws/chat", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}
