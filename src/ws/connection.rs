//! WebSocket connection lifecycle.
//!
//! One task per connection runs [`run_connection`]:
//!
//! ```text
//! Connecting ──register + "connected"──▶ Open ──close / read error / lost peer──▶ Closing ──▶ Closed
//!                                         │ ▲
//!                                         └─┘ one inbound frame, fully handled
//! ```
//!
//! Frames are handled strictly one at a time: a chat message is relayed to
//! completion before the next frame is read. The connection is
//! deregistered exactly once, when the session's [`Registration`] drops.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};

use super::messages::{ClientCommand, DecodeError, decode_frame};
use crate::domain::{
    ChatTurn, ConnectionId, ConnectionRegistry, ConnectionStatus, Envelope, FrameSink, GroupKey,
    Registration, SendError, TransportError,
};
use crate::service::{RelayOutcome, StreamingRelay};

/// Transport-neutral inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary,
    /// The peer started the closing handshake.
    Close,
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet announced to the client.
    Connecting,
    /// Processing inbound frames.
    Open,
    /// Leaving the frame loop.
    Closing,
    /// Deregistered; terminal.
    Closed,
}

/// Per-connection options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Group joined at accept time.
    pub initial_group: Option<GroupKey>,
    /// Prior turns kept as context (0 disables context).
    pub history_max_turns: usize,
}

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Send(#[from] SendError),
}

#[derive(Debug)]
struct Session {
    registration: Registration,
    registry: Arc<ConnectionRegistry>,
    relay: StreamingRelay,
    group: Option<GroupKey>,
    history: Vec<ChatTurn>,
    history_max_turns: usize,
    state: ConnectionState,
}

/// Runs the full lifecycle of one connection.
///
/// `sink` is handed to the registry; `inbound` is read until the peer
/// closes, the transport fails, or the connection is found dead. Returns
/// the id the connection was registered under.
pub async fn run_connection<R>(
    sink: FrameSink,
    mut inbound: R,
    registry: Arc<ConnectionRegistry>,
    relay: StreamingRelay,
    options: SessionOptions,
) -> ConnectionId
where
    R: Stream<Item = Result<Inbound, TransportError>> + Unpin,
{
    let registration = registry.register_scoped(sink);
    let id = registration.id();
    let mut session = Session {
        registration,
        registry,
        relay,
        group: None,
        history: Vec::new(),
        history_max_turns: options.history_max_turns,
        state: ConnectionState::Connecting,
    };
    session.adopt_group(options.initial_group);
    tracing::info!(connection_id = %id, group = ?session.group, "client connected");

    let greeting = Envelope::status(
        ConnectionStatus::Connected,
        Some("Successfully connected to chat server".to_string()),
        session.group.clone(),
    );
    session.state = match session.send(&greeting).await {
        Ok(()) => ConnectionState::Open,
        Err(_) => ConnectionState::Closing,
    };

    while session.state == ConnectionState::Open {
        let keep_open = match inbound.next().await {
            Some(Ok(Inbound::Text(text))) => {
                let result = session.dispatch(&text).await;
                session.settle(result).await
            }
            Some(Ok(Inbound::Binary)) => session.settle(Err(DecodeError::Binary.into())).await,
            Some(Ok(Inbound::Close)) | None => {
                tracing::debug!(connection_id = %id, "peer closed connection");
                false
            }
            Some(Err(err)) => {
                tracing::warn!(connection_id = %id, error = %err, "read failed");
                false
            }
        };
        if !keep_open {
            session.state = ConnectionState::Closing;
        }
    }

    drop(session);
    tracing::info!(connection_id = %id, state = ?ConnectionState::Closed, "client disconnected");
    id
}

impl Session {
    fn id(&self) -> ConnectionId {
        self.registration.id()
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        self.registry.send_to(self.id(), envelope).await
    }

    /// Decodes and executes one text frame.
    async fn dispatch(&mut self, text: &str) -> Result<(), SessionError> {
        match decode_frame(text)? {
            ClientCommand::Chat {
                message,
                conversation_id,
            } => {
                self.adopt_group(conversation_id);
                self.chat(message).await?;
            }
            ClientCommand::Ping { conversation_id } => {
                self.adopt_group(conversation_id);
                self.send(&Envelope::pong(self.group.clone())).await?;
            }
            ClientCommand::Unknown { frame_type } => {
                tracing::debug!(connection_id = %self.id(), %frame_type, "ignoring unknown frame type");
            }
        }
        Ok(())
    }

    /// Maps the result of one frame to the next state. Returns `false` when
    /// the connection must close.
    async fn settle(&mut self, result: Result<(), SessionError>) -> bool {
        match result {
            Ok(()) => true,
            Err(SessionError::Decode(err)) => {
                tracing::debug!(connection_id = %self.id(), error = %err, "rejected inbound frame");
                let reply = Envelope::error(err.to_string(), self.group.clone());
                !matches!(self.send(&reply).await, Err(SendError::ConnectionLost))
            }
            Err(SessionError::Send(SendError::ConnectionLost)) => false,
            Err(SessionError::Send(err)) => {
                tracing::error!(connection_id = %self.id(), error = %err, "failed to send envelope");
                true
            }
        }
    }

    async fn chat(&mut self, message: String) -> Result<(), SendError> {
        if message.trim().is_empty() {
            return Ok(());
        }
        self.send(&Envelope::status(
            ConnectionStatus::Processing,
            Some("Processing your message...".to_string()),
            self.group.clone(),
        ))
        .await?;

        let outcome = self
            .relay
            .relay_chat(self.id(), &message, &self.history, self.group.as_ref())
            .await;
        match outcome {
            RelayOutcome::Completed { reply, .. } => self.remember(message, reply),
            RelayOutcome::ProducerFailed(_) => {}
            RelayOutcome::Aborted(err) => return Err(err),
        }
        Ok(())
    }

    /// Switches the connection to `group` if one is given.
    fn adopt_group(&mut self, group: Option<GroupKey>) {
        let Some(group) = group else {
            return;
        };
        if self.group.as_ref() == Some(&group) {
            return;
        }
        if self.registry.join_group(self.id(), group.clone()) {
            self.group = Some(group);
        }
    }

    /// Appends one exchange, evicting the oldest whole exchanges until the
    /// history fits. An odd bound keeps one turn less than it allows.
    fn remember(&mut self, message: String, reply: String) {
        if self.history_max_turns == 0 {
            return;
        }
        self.history.push(ChatTurn::user(message));
        self.history.push(ChatTurn::assistant(reply));
        while self.history.len() > self.history_max_turns {
            self.history.drain(..2);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::Role;
    use crate::producer::ScriptedProducer;
    use crate::service::{ChatService, CompletionSettings};
    use crate::test_support::{drain_frames, recording_sink};

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        relay: StreamingRelay,
        producer: Arc<ScriptedProducer>,
    }

    fn harness(producer: ScriptedProducer) -> Harness {
        let producer = Arc::new(producer);
        let registry = Arc::new(ConnectionRegistry::new());
        let concrete: Arc<ScriptedProducer> = Arc::clone(&producer);
        let chat = ChatService::new(
            concrete,
            CompletionSettings {
                model: "scripted".to_string(),
                temperature: 0.7,
                max_output_tokens: 100,
                system_prompt: String::new(),
            },
        );
        let relay = StreamingRelay::new(Arc::clone(&registry), Arc::new(chat));
        Harness {
            registry,
            relay,
            producer,
        }
    }

    fn frames(texts: &[&str]) -> Vec<Result<Inbound, TransportError>> {
        texts
            .iter()
            .map(|t| Ok(Inbound::Text((*t).to_string())))
            .collect()
    }

    async fn run(
        h: &Harness,
        inbound: Vec<Result<Inbound, TransportError>>,
        options: SessionOptions,
    ) -> (ConnectionId, Vec<serde_json::Value>) {
        let (sink, mut rx) = recording_sink();
        let id = run_connection(
            sink,
            stream::iter(inbound),
            Arc::clone(&h.registry),
            h.relay.clone(),
            options,
        )
        .await;
        (id, drain_frames(&mut rx))
    }

    fn types(frames: &[serde_json::Value]) -> Vec<&str> {
        frames
            .iter()
            .filter_map(|f| f.get("type").and_then(|v| v.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn greets_then_deregisters_on_close() {
        let h = harness(ScriptedProducer::new(["x"]));
        let (id, frames) = run(&h, vec![Ok(Inbound::Close)], SessionOptions::default()).await;

        assert_eq!(types(&frames), vec!["status"]);
        let status = frames
            .first()
            .and_then(|f| f.get("data"))
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_str());
        assert_eq!(status, Some("connected"));
        assert!(!h.registry.is_active(id));
        assert_eq!(h.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn chat_is_acknowledged_then_streamed() {
        let h = harness(ScriptedProducer::new(["A", "B"]));
        let (_, frames) = run(
            &h,
            frames(&[r#"{"type":"message","message":"hi"}"#]),
            SessionOptions::default(),
        )
        .await;

        assert_eq!(
            types(&frames),
            vec!["status", "status", "message", "message", "message"]
        );
        let last_complete = frames
            .last()
            .and_then(|f| f.get("data"))
            .and_then(|d| d.get("is_complete"))
            .and_then(|v| v.as_bool());
        assert_eq!(last_complete, Some(true));
    }

    #[tokio::test]
    async fn blank_message_produces_nothing() {
        let h = harness(ScriptedProducer::new(["A"]));
        let (_, frames) = run(
            &h,
            frames(&[r#"{"type":"message","message":"   "}"#, r#"{"type":"ping"}"#]),
            SessionOptions::default(),
        )
        .await;

        assert_eq!(types(&frames), vec!["status", "pong"]);
        assert!(h.producer.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_yields_one_error_and_stays_open() {
        let h = harness(ScriptedProducer::new(["A"]));
        let (_, frames) = run(
            &h,
            frames(&["{not json", r#"{"type":"ping"}"#]),
            SessionOptions::default(),
        )
        .await;

        assert_eq!(types(&frames), vec!["status", "error", "pong"]);
        let message = frames
            .get(1)
            .and_then(|f| f.get("data"))
            .and_then(|d| d.get("message"))
            .and_then(|v| v.as_str());
        assert_eq!(message, Some("Invalid JSON format"));
    }

    #[tokio::test]
    async fn unknown_type_is_silently_ignored() {
        let h = harness(ScriptedProducer::new(["A"]));
        let (_, frames) = run(
            &h,
            frames(&[
                r#"{"type":"typing","message":[1]}"#,
                r#"{"type":7}"#,
                r#"{"type":"ping","message":42}"#,
            ]),
            SessionOptions::default(),
        )
        .await;
        assert_eq!(types(&frames), vec!["status", "pong"]);
    }

    #[tokio::test]
    async fn binary_frame_is_rejected_without_closing() {
        let h = harness(ScriptedProducer::new(["A"]));
        let inbound = vec![Ok(Inbound::Binary), Ok(Inbound::Text(r#"{"type":"ping"}"#.to_string()))];
        let (_, frames) = run(&h, inbound, SessionOptions::default()).await;
        assert_eq!(types(&frames), vec!["status", "error", "pong"]);
    }

    #[tokio::test]
    async fn read_error_closes_and_deregisters() {
        let h = harness(ScriptedProducer::new(["A"]));
        let inbound = vec![
            Err(TransportError::new("reset")),
            Ok(Inbound::Text(r#"{"type":"ping"}"#.to_string())),
        ];
        let (id, frames) = run(&h, inbound, SessionOptions::default()).await;
        assert_eq!(types(&frames), vec!["status"]);
        assert!(!h.registry.is_active(id));
    }

    #[tokio::test]
    async fn producer_failure_keeps_connection_open() {
        let h = harness(ScriptedProducer::failing(["A"], "quota exceeded"));
        let (_, frames) = run(
            &h,
            frames(&[r#"{"message":"hi"}"#, r#"{"type":"ping"}"#]),
            SessionOptions::default(),
        )
        .await;
        assert_eq!(
            types(&frames),
            vec!["status", "status", "message", "error", "pong"]
        );
    }

    #[tokio::test]
    async fn conversation_id_joins_group_and_tags_envelopes() {
        let h = harness(ScriptedProducer::new(["A"]));
        let (sink, mut rx) = recording_sink();
        let (tx, rx_frames) = mpsc::unbounded_channel::<Result<Inbound, TransportError>>();
        let inbound = tokio_stream_from(rx_frames);
        let registry = Arc::clone(&h.registry);
        let task = tokio::spawn(run_connection(
            sink,
            inbound,
            Arc::clone(&h.registry),
            h.relay.clone(),
            SessionOptions::default(),
        ));

        let _ = tx.send(Ok(Inbound::Text(
            r#"{"type":"ping","conversation_id":"conv-9"}"#.to_string(),
        )));
        let Some(_greeting) = rx.recv().await else {
            panic!("no greeting");
        };
        let Some(pong) = rx.recv().await else {
            panic!("no pong");
        };
        assert!(pong.contains("\"conversation_id\":\"conv-9\""));
        let Some(group) = GroupKey::parse("conv-9") else {
            panic!("valid key");
        };
        assert_eq!(registry.group_members(&group).len(), 1);

        drop(tx);
        let Ok(id) = task.await else {
            panic!("session task failed");
        };
        assert!(!registry.is_active(id));
        assert_eq!(registry.group_count(), 0);
    }

    #[tokio::test]
    async fn initial_group_is_joined_at_accept() {
        let h = harness(ScriptedProducer::new(["A"]));
        let options = SessionOptions {
            initial_group: GroupKey::parse("lobby"),
            history_max_turns: 0,
        };
        let (_, frames) = run(&h, frames(&[r#"{"type":"ping"}"#]), options).await;
        for frame in &frames {
            assert_eq!(
                frame.get("conversation_id").and_then(|v| v.as_str()),
                Some("lobby")
            );
        }
    }

    #[tokio::test]
    async fn history_is_carried_between_messages() {
        let h = harness(ScriptedProducer::new(["ok"]));
        let options = SessionOptions {
            initial_group: None,
            history_max_turns: 2,
        };
        let _ = run(
            &h,
            frames(&[
                r#"{"message":"first"}"#,
                r#"{"message":"second"}"#,
                r#"{"message":"third"}"#,
            ]),
            options,
        )
        .await;

        let requests = h.producer.requests();
        let sizes: Vec<usize> = requests.iter().map(|r| r.messages.len()).collect();
        assert_eq!(sizes, vec![1, 3, 3]);
        let Some(last) = requests.last() else {
            panic!("no requests");
        };
        assert_eq!(last.messages.first(), Some(&ChatTurn::user("second")));
        assert_eq!(last.messages.get(1), Some(&ChatTurn::assistant("ok")));
    }

    #[tokio::test]
    async fn odd_history_bound_keeps_whole_exchanges() {
        let h = harness(ScriptedProducer::new(["ok"]));
        let options = SessionOptions {
            initial_group: None,
            history_max_turns: 3,
        };
        let _ = run(
            &h,
            frames(&[
                r#"{"message":"q1"}"#,
                r#"{"message":"q2"}"#,
                r#"{"message":"q3"}"#,
            ]),
            options,
        )
        .await;

        let requests = h.producer.requests();
        for request in &requests {
            assert_eq!(
                request.messages.first().map(|turn| turn.role),
                Some(Role::User),
                "history must open with a user turn"
            );
        }
        let Some(last) = requests.last() else {
            panic!("no requests");
        };
        assert_eq!(
            last.messages,
            vec![
                ChatTurn::user("q2"),
                ChatTurn::assistant("ok"),
                ChatTurn::user("q3"),
            ]
        );
    }

    #[tokio::test]
    async fn single_turn_bound_never_leaves_orphan_reply() {
        let h = harness(ScriptedProducer::new(["ok"]));
        let options = SessionOptions {
            initial_group: None,
            history_max_turns: 1,
        };
        let _ = run(
            &h,
            frames(&[r#"{"message":"q1"}"#, r#"{"message":"q2"}"#]),
            options,
        )
        .await;

        let Some(last) = h.producer.requests().pop() else {
            panic!("no requests");
        };
        assert_eq!(last.messages, vec![ChatTurn::user("q2")]);
    }

    #[tokio::test]
    async fn lost_peer_mid_relay_ends_session() {
        let h = harness(ScriptedProducer::new(["A", "B", "C"]).with_delay(Duration::from_millis(20)));
        let (sink, mut rx) = recording_sink();
        let (tx, rx_frames) = mpsc::unbounded_channel::<Result<Inbound, TransportError>>();
        let registry = Arc::clone(&h.registry);
        let task = tokio::spawn(run_connection(
            sink,
            tokio_stream_from(rx_frames),
            Arc::clone(&h.registry),
            h.relay.clone(),
            SessionOptions::default(),
        ));

        let _ = tx.send(Ok(Inbound::Text(r#"{"message":"hi"}"#.to_string())));
        // greeting, processing, first fragment
        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
        drop(rx);

        let Ok(id) = task.await else {
            panic!("session task failed");
        };
        assert!(!registry.is_active(id));
        assert!(h.producer.pulled() < 3);
        drop(tx);
    }

    /// Adapts an unbounded receiver into an inbound stream.
    fn tokio_stream_from(
        rx: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    ) -> impl Stream<Item = Result<Inbound, TransportError>> + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}
