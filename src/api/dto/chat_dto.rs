//! Chat request/response DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::ChatTurn;

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// User text; must not be blank.
    pub message: String,
    /// Conversation whose live connections also receive the reply.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

/// Response body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    /// The full completion text.
    pub message: String,
    /// Echo of the request's conversation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Always `true`: the reply is complete.
    pub is_complete: bool,
}
