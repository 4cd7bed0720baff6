//! Streaming relay: drives one completion stream into one connection.
//!
//! For every fragment the producer yields, a non-final content envelope is
//! sent before the next fragment is pulled, so frames leave in production
//! order. A successful stream ends with exactly one empty `is_complete`
//! envelope; a failed stream ends with exactly one error envelope and no
//! completion marker. If the target connection disappears, the stream is
//! dropped immediately so the provider is not drained for nobody.

use std::sync::Arc;

use futures_util::StreamExt;

use super::ChatService;
use crate::domain::{ChatTurn, ConnectionId, ConnectionRegistry, Envelope, GroupKey, SendError};
use crate::producer::{FragmentStream, ProducerError};

/// How a relay invocation ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The stream ended normally and the completion marker was sent.
    Completed {
        /// Concatenation of every relayed fragment.
        reply: String,
        /// Number of fragments relayed.
        fragments: usize,
    },
    /// The producer failed; an error envelope was sent to the client.
    ProducerFailed(ProducerError),
    /// A send to the target failed; the remaining stream was abandoned.
    Aborted(SendError),
}

impl RelayOutcome {
    /// Returns `true` if the target connection is gone.
    #[must_use]
    pub const fn connection_lost(&self) -> bool {
        matches!(self, Self::Aborted(SendError::ConnectionLost))
    }
}

/// Relays producer output to a single connection through the registry.
#[derive(Debug, Clone)]
pub struct StreamingRelay {
    registry: Arc<ConnectionRegistry>,
    chat: Arc<ChatService>,
}

impl StreamingRelay {
    /// Creates a relay over the given registry and chat service.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, chat: Arc<ChatService>) -> Self {
        Self { registry, chat }
    }

    /// Asks the chat service for a reply to `user_message` and relays it to
    /// `target`.
    pub async fn relay_chat(
        &self,
        target: ConnectionId,
        user_message: &str,
        history: &[ChatTurn],
        group: Option<&GroupKey>,
    ) -> RelayOutcome {
        let fragments = self.chat.stream_reply(user_message, history);
        self.relay(target, fragments, group).await
    }

    /// Relays an already started fragment stream to `target`.
    pub async fn relay(
        &self,
        target: ConnectionId,
        mut fragments: FragmentStream,
        group: Option<&GroupKey>,
    ) -> RelayOutcome {
        let mut reply = String::new();
        let mut count = 0usize;

        while let Some(item) = fragments.next().await {
            let text = match item {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(connection_id = %target, error = %err, "completion failed");
                    let envelope =
                        Envelope::error(format!("Error processing message: {err}"), group.cloned());
                    if let Err(send_err) = self.registry.send_to(target, &envelope).await {
                        return Self::abort(target, send_err);
                    }
                    return RelayOutcome::ProducerFailed(err);
                }
            };
            let envelope = Envelope::fragment(text.as_str(), group.cloned());
            if let Err(err) = self.registry.send_to(target, &envelope).await {
                return Self::abort(target, err);
            }
            reply.push_str(&text);
            count += 1;
        }

        if let Err(err) = self
            .registry
            .send_to(target, &Envelope::completion(group.cloned()))
            .await
        {
            return Self::abort(target, err);
        }
        tracing::debug!(connection_id = %target, fragments = count, "relay completed");
        RelayOutcome::Completed {
            reply,
            fragments: count,
        }
    }

    fn abort(target: ConnectionId, err: SendError) -> RelayOutcome {
        tracing::info!(connection_id = %target, error = %err, "relay aborted");
        RelayOutcome::Aborted(err)
    }
}
