//! Non-streaming chat endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{ChatRequest, ChatResponse};
use crate::app_state::AppState;
use crate::domain::{Envelope, GroupKey};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /api/chat` — Run one completion to the end.
///
/// When `conversation_id` names a group with live WebSocket connections,
/// the reply is also delivered to them as one content envelope followed by
/// the final envelope.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a blank or over-long
/// message and [`GatewayError::Producer`] when the completion fails.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "Chat",
    summary = "Send a chat message",
    description = "Runs one completion and returns the accumulated reply. Prior turns may be supplied in `history`.",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Completed reply", body = ChatResponse),
        (status = 400, description = "Blank or over-long message", body = ErrorResponse),
        (status = 502, description = "Completion provider failed", body = ErrorResponse),
    )
)]
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, GatewayError> {
    validate_message(&req.message, state.limits.max_message_chars)?;

    let reply = state
        .chat_service
        .complete(&req.message, &req.history)
        .await?;

    if let Some(group) = req.conversation_id.clone().and_then(GroupKey::parse) {
        let content = Envelope::fragment(reply.clone(), Some(group.clone()));
        let delivery = state.registry.send_to_group(&group, &content).await;
        if delivery.delivered > 0 {
            state
                .registry
                .send_to_group(&group, &Envelope::completion(Some(group.clone())))
                .await;
        }
        tracing::debug!(
            group = %group,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "fanned out REST reply"
        );
    }

    Ok(Json(ChatResponse {
        message: reply,
        conversation_id: req.conversation_id,
        is_complete: true,
    }))
}

fn validate_message(message: &str, max_chars: usize) -> Result<(), GatewayError> {
    if message.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "message must not be empty".to_string(),
        ));
    }
    if message.chars().count() > max_chars {
        return Err(GatewayError::InvalidRequest(format!(
            "message exceeds {max_chars} characters"
        )));
    }
    Ok(())
}

/// Chat routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/chat", post(chat_handler))
}
