//! In-memory transports shared by unit tests.

use futures_util::sink;
use tokio::sync::mpsc;

use crate::domain::{FrameSink, TransportError};

/// A sink that forwards every frame to the returned receiver.
///
/// Writes start failing once the receiver is dropped.
pub(crate) fn recording_sink() -> (FrameSink, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = sink::unfold(tx, |tx, frame: String| async move {
        tx.send(frame)
            .map_err(|err| TransportError::new(err.to_string()))?;
        Ok::<_, TransportError>(tx)
    });
    (Box::pin(sink), rx)
}

/// A sink whose every write fails.
pub(crate) fn broken_sink() -> FrameSink {
    Box::pin(sink::unfold((), |(), _frame: String| async {
        Err::<(), _>(TransportError::new("broken pipe"))
    }))
}

/// Drains every frame currently buffered in `rx`, decoded as JSON.
pub(crate) fn drain_frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Ok(value) = serde_json::from_str(&frame) {
            frames.push(value);
        }
    }
    frames
}
