//! REST API layer: route handlers, DTOs, router composition and the
//! OpenAPI document.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "chat-relay-gateway",
        description = "Relays chat messages to a streaming completion API. Streaming replies are served on the `/ws/chat` WebSocket."
    ),
    paths(
        handlers::system::root_handler,
        handlers::system::health_handler,
        handlers::chat::chat_handler,
    ),
    components(schemas(
        dto::ChatRequest,
        dto::ChatResponse,
        handlers::system::RootResponse,
        handlers::system::HealthResponse,
        crate::domain::ChatTurn,
        crate::domain::Role,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Banner and health"),
        (name = "Chat", description = "Non-streaming chat"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::chat::routes())
        .merge(handlers::system::routes())
}
