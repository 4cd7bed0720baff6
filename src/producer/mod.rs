//! External completion producer.
//!
//! A producer turns an ordered conversation into a lazy, finite,
//! non-restartable stream of text fragments. Each pull yields one of:
//!
//! - `Some(Ok(text))`: the next fragment,
//! - `Some(Err(_))`: a terminal failure; callers must stop pulling,
//! - `None`: normal end of stream.

pub mod openai;
pub mod scripted;

use std::fmt;

use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::domain::ChatTurn;

pub use openai::OpenAiProducer;
pub use scripted::ScriptedProducer;

/// Lazily pulled completion output.
pub type FragmentStream = BoxStream<'static, Result<String, ProducerError>>;

/// Parameters of one streaming completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Conversation, oldest turn first; the last turn is the user's message.
    pub messages: Vec<ChatTurn>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

/// Failure of the external completion call, at any point of the stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    /// The request could not be sent.
    #[error("request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The response body was interrupted mid-stream.
    #[error("stream interrupted: {0}")]
    Stream(String),

    /// A stream event could not be parsed.
    #[error("malformed stream event: {0}")]
    Malformed(String),

    /// The provider reported an error inside the stream.
    #[error("provider error: {0}")]
    Api(String),
}

/// Source of streamed completions.
///
/// Implementations must be cheap to call: all network work happens while
/// the returned stream is polled.
pub trait CompletionProducer: Send + Sync + fmt::Debug {
    /// Starts a completion and returns its fragment stream.
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream;
}
