//! Axum WebSocket upgrade handler.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt, future};
use serde::Deserialize;

use super::connection::{Inbound, SessionOptions, run_connection};
use crate::app_state::AppState;
use crate::domain::{FrameSink, GroupKey, TransportError};

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Conversation to join immediately.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// `GET /ws/chat` — Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let options = SessionOptions {
        initial_group: params.conversation_id.and_then(GroupKey::parse),
        history_max_turns: state.limits.history_max_turns,
    };
    ws.on_upgrade(move |socket| serve_socket(socket, state, options))
}

async fn serve_socket(socket: WebSocket, state: AppState, options: SessionOptions) {
    let (ws_tx, ws_rx) = socket.split();

    let sink: FrameSink = Box::pin(
        ws_tx
            .with(|frame: String| future::ready(Ok::<_, axum::Error>(Message::text(frame))))
            .sink_map_err(|err| TransportError::new(err.to_string())),
    );

    let inbound = ws_rx.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(_)) => Some(Ok(Inbound::Binary)),
            Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
            // Transport keep-alives are answered by axum itself.
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(err) => Some(Err(TransportError::new(err.to_string()))),
        })
    });

    let registry = std::sync::Arc::clone(&state.registry);
    run_connection(sink, inbound, registry, state.relay(), options).await;
}
