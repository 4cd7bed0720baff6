//! Service layer: chat orchestration and streaming relay.
//!
//! [`ChatService`] assembles prompts and drives the completion producer;
//! [`StreamingRelay`] turns a producer stream into ordered envelopes sent
//! through the [`crate::domain::ConnectionRegistry`].

pub mod chat_service;
pub mod relay;

pub use chat_service::{ChatService, CompletionSettings};
pub use relay::{RelayOutcome, StreamingRelay};
