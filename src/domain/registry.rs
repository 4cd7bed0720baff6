//! Concurrent registry of live connections and their conversation groups.
//!
//! [`ConnectionRegistry`] owns every connection's write half (a
//! [`FrameSink`]) and the mapping from [`GroupKey`] to member ids. All map
//! mutation happens under a single short-lived [`parking_lot::RwLock`]
//! critical section, so a lookup observes a connection either fully
//! registered (map + group) or fully removed. Network writes never happen
//! under that lock: each connection's sink sits behind its own
//! [`tokio::sync::Mutex`], which also serializes frames per connection.
//!
//! A failed write is the single implicit cleanup trigger: the sending path
//! deregisters the peer and reports [`SendError::ConnectionLost`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::{Sink, SinkExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{ConnectionId, Envelope, GroupKey};

/// Write half of a connection, accepting encoded text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

type SharedSink = Arc<Mutex<FrameSink>>;

/// Failure reported by the underlying transport while writing a frame.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(String);

impl TransportError {
    /// Creates a transport error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure of [`ConnectionRegistry::send_to`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The target is not registered, or the write failed and the target
    /// has just been deregistered.
    #[error("connection lost")]
    ConnectionLost,

    /// The envelope could not be encoded; nothing was written.
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome summary of a best-effort fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupDelivery {
    /// Members that accepted the frame.
    pub delivered: usize,
    /// Members whose write failed and that were deregistered.
    pub dropped: usize,
}

struct ConnectionEntry {
    sink: SharedSink,
    group: Option<GroupKey>,
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    groups: HashMap<GroupKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// Removes `id` from `group`, dropping the group once it is empty.
    fn leave_group(&mut self, id: ConnectionId, group: &GroupKey) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

/// Central store of live connections.
///
/// # Invariants
///
/// - Every id in a group's member set is also a registered connection.
/// - A group key is present only while its member set is non-empty.
/// - A connection belongs to at most one group.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `sink` under a freshly minted [`ConnectionId`].
    pub fn register(&self, sink: FrameSink) -> ConnectionId {
        let id = ConnectionId::new();
        let entry = ConnectionEntry {
            sink: Arc::new(Mutex::new(sink)),
            group: None,
        };
        self.state.write().connections.insert(id, entry);
        tracing::debug!(connection_id = %id, "connection registered");
        id
    }

    /// Registers `sink` and returns a guard that deregisters it on drop.
    pub fn register_scoped(self: &Arc<Self>, sink: FrameSink) -> Registration {
        Registration {
            id: self.register(sink),
            registry: Arc::clone(self),
        }
    }

    /// Removes `id` from the active map and from its group.
    ///
    /// Idempotent: returns `false` if `id` was not registered. Concurrent
    /// calls for the same id collapse to a single removal.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.connections.remove(&id) else {
            return false;
        };
        if let Some(group) = &entry.group {
            state.leave_group(id, group);
        }
        drop(state);
        tracing::debug!(connection_id = %id, group = ?entry.group, "connection deregistered");
        true
    }

    /// Adds `id` to `group`, creating the group if needed.
    ///
    /// A connection already in another group is moved. Returns `false`
    /// without effect when `id` is not registered.
    pub fn join_group(&self, id: ConnectionId, group: GroupKey) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        if entry.group.as_ref() == Some(&group) {
            return true;
        }
        let previous = entry.group.replace(group.clone());
        state.groups.entry(group).or_default().insert(id);
        if let Some(previous) = previous {
            state.leave_group(id, &previous);
        }
        true
    }

    /// Sends one envelope to one connection.
    ///
    /// # Errors
    ///
    /// - [`SendError::ConnectionLost`] if `id` is not registered, or if the
    ///   write fails; in the latter case `id` has been deregistered.
    /// - [`SendError::Encode`] if the envelope cannot be encoded.
    pub async fn send_to(&self, id: ConnectionId, envelope: &Envelope) -> Result<(), SendError> {
        let frame = envelope.to_frame()?;
        let Some(sink) = self.sink_of(id) else {
            return Err(SendError::ConnectionLost);
        };
        self.deliver(id, &sink, frame).await
    }

    /// Sends one envelope to every member of `group`.
    ///
    /// Best effort: a failing member is deregistered without affecting
    /// delivery to the others. An unknown group delivers to nobody.
    pub async fn send_to_group(&self, group: &GroupKey, envelope: &Envelope) -> GroupDelivery {
        let targets = {
            let state = self.state.read();
            state
                .groups
                .get(group)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| {
                            state
                                .connections
                                .get(id)
                                .map(|entry| (*id, Arc::clone(&entry.sink)))
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        self.fan_out(targets, envelope).await
    }

    /// Sends one envelope to every registered connection, best effort.
    ///
    /// Returns the number of connections that accepted the frame.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let targets = {
            let state = self.state.read();
            state
                .connections
                .iter()
                .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
                .collect::<Vec<_>>()
        };
        self.fan_out(targets, envelope).await.delivered
    }

    /// Number of registered connections. May be stale as soon as it returns.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of non-empty groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.state.read().groups.len()
    }

    /// Returns `true` if `id` is currently registered.
    #[must_use]
    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Returns the group `id` belongs to, if any.
    #[must_use]
    pub fn group_of(&self, id: ConnectionId) -> Option<GroupKey> {
        self.state
            .read()
            .connections
            .get(&id)
            .and_then(|entry| entry.group.clone())
    }

    /// Returns the current members of `group`.
    #[must_use]
    pub fn group_members(&self, group: &GroupKey) -> Vec<ConnectionId> {
        self.state
            .read()
            .groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn sink_of(&self, id: ConnectionId) -> Option<SharedSink> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|entry| Arc::clone(&entry.sink))
    }

    async fn deliver(
        &self,
        id: ConnectionId,
        sink: &SharedSink,
        frame: String,
    ) -> Result<(), SendError> {
        let result = sink.lock().await.send(frame).await;
        if let Err(err) = result {
            tracing::warn!(connection_id = %id, error = %err, "write failed, dropping connection");
            self.deregister(id);
            return Err(SendError::ConnectionLost);
        }
        Ok(())
    }

    async fn fan_out(
        &self,
        targets: Vec<(ConnectionId, SharedSink)>,
        envelope: &Envelope,
    ) -> GroupDelivery {
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode fan-out envelope");
                return GroupDelivery::default();
            }
        };
        let results = join_all(
            targets
                .iter()
                .map(|(id, sink)| self.deliver(*id, sink, frame.clone())),
        )
        .await;
        let delivered = results.iter().filter(|r| r.is_ok()).count();
        GroupDelivery {
            delivered,
            dropped: results.len() - delivered,
        }
    }
}

/// Keeps a connection registered for as long as it is alive.
///
/// Dropping the guard deregisters the connection, whichever way the owning
/// task ends.
#[derive(Debug)]
pub struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    /// The registered connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
