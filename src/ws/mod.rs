//! WebSocket layer: connection lifecycle and inbound frame decoding.
//!
//! The WebSocket endpoint at `/ws/chat` relays each chat message to the
//! completion provider and streams the reply back as envelopes.

pub mod connection;
pub mod handler;
pub mod messages;
