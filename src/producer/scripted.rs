//! Deterministic producer for tests and offline runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{StreamExt, stream};
use parking_lot::Mutex;

use super::{CompletionProducer, CompletionRequest, FragmentStream, ProducerError};

/// Replays a fixed script on every call.
///
/// The script is a list of fragments optionally followed by a failure.
/// Every request is recorded, and the number of items actually pulled by
/// consumers is counted, so tests can observe early aborts.
#[derive(Debug, Default)]
pub struct ScriptedProducer {
    fragments: Vec<String>,
    failure: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedProducer {
    /// A producer that yields `fragments` and then ends normally.
    #[must_use]
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A producer that yields `fragments` and then fails with `message`.
    #[must_use]
    pub fn failing<I, S>(fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failure: Some(message.into()),
            ..Self::new(fragments)
        }
    }

    /// Waits `delay` before every item.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    /// Number of items (fragments or failures) consumers have pulled.
    #[must_use]
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

impl CompletionProducer for ScriptedProducer {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        self.requests.lock().push(request);

        let items: Vec<Result<String, ProducerError>> = self
            .fragments
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.failure.clone().map(|m| Err(ProducerError::Api(m))))
            .collect();
        let pulled = Arc::clone(&self.pulled);
        let delay = self.delay;

        stream::iter(items)
            .then(move |item| {
                let pulled = Arc::clone(&pulled);
                async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    pulled.fetch_add(1, Ordering::SeqCst);
                    item
                }
            })
            .boxed()
    }
}
