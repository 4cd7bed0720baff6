//! Chat service: prompt assembly on top of a completion producer.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::domain::ChatTurn;
use crate::producer::{CompletionProducer, CompletionRequest, FragmentStream, ProducerError};

/// Model parameters applied to every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Leading system turn; omitted when empty.
    pub system_prompt: String,
}

/// Builds completion requests and drives the producer.
///
/// Stateless apart from its settings: conversation context is passed in by
/// the caller on every call.
#[derive(Debug, Clone)]
pub struct ChatService {
    producer: Arc<dyn CompletionProducer>,
    settings: CompletionSettings,
}

impl ChatService {
    /// Creates a new `ChatService`.
    #[must_use]
    pub fn new(producer: Arc<dyn CompletionProducer>, settings: CompletionSettings) -> Self {
        Self { producer, settings }
    }

    /// Assembles the ordered conversation sent to the producer:
    /// system prompt, prior turns, then the new user message.
    #[must_use]
    pub fn build_messages(&self, user_message: &str, history: &[ChatTurn]) -> Vec<ChatTurn> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.settings.system_prompt.is_empty() {
            messages.push(ChatTurn::system(self.settings.system_prompt.clone()));
        }
        messages.extend_from_slice(history);
        messages.push(ChatTurn::user(user_message));
        messages
    }

    /// Starts a streamed reply to `user_message`.
    pub fn stream_reply(&self, user_message: &str, history: &[ChatTurn]) -> FragmentStream {
        self.producer.stream_completion(CompletionRequest {
            model: self.settings.model.clone(),
            messages: self.build_messages(user_message, history),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        })
    }

    /// Runs a completion to the end and returns the accumulated text.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProducerError`] the stream yields; fragments
    /// received before it are discarded.
    pub async fn complete(
        &self,
        user_message: &str,
        history: &[ChatTurn],
    ) -> Result<String, ProducerError> {
        let mut fragments = self.stream_reply(user_message, history);
        let mut reply = String::new();
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }

    /// Sends a minimal completion to check that the provider accepts our
    /// credentials. Returns `false` on any failure.
    pub async fn probe(&self) -> bool {
        let mut fragments = self.producer.stream_completion(CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatTurn::user("Hello")],
            temperature: self.settings.temperature,
            max_output_tokens: 5,
        });
        match fragments.next().await {
            Some(Err(err)) => {
                tracing::warn!(error = %err, "completion provider probe failed");
                false
            }
            _ => true,
        }
    }
}
