//! Domain layer: identifiers, envelopes, and the connection registry.
//!
//! This module holds the gateway's core model: the identity of a live
//! connection, the conversation key that groups connections, the outbound
//! envelope type, conversation turns, and the concurrent registry that
//! owns every connection's write half.

pub mod chat_turn;
pub mod connection_id;
pub mod envelope;
pub mod group_key;
pub mod registry;

pub use chat_turn::{ChatTurn, Role};
pub use connection_id::ConnectionId;
pub use envelope::{ConnectionStatus, Envelope, EnvelopeKind, Payload};
pub use group_key::GroupKey;
pub use registry::{
    ConnectionRegistry, FrameSink, GroupDelivery, Registration, SendError, TransportError,
};
