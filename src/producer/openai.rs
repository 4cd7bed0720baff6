//! Streaming client for OpenAI-compatible chat completion APIs.
//!
//! Sends `POST {base}/chat/completions` with `stream: true` and decodes the
//! server-sent event body into text fragments. Only the connect phase is
//! bounded by a timeout; a stalled stream stays open until the provider or
//! the network closes it.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};

use super::{CompletionProducer, CompletionRequest, FragmentStream, ProducerError};
use crate::domain::ChatTurn;

const COMPLETIONS_PATH: &str = "/chat/completions";
const DONE_MARKER: &str = "[DONE]";

/// Completion producer backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiProducer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiProducer {
    /// Creates a client for the API rooted at `base_url`
    /// (e.g. `https://api.openai.com/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Request`] if the HTTP client cannot be
    /// built (e.g. no TLS backend available).
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProducerError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{COMPLETIONS_PATH}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Full URL completions are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for OpenAiProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProducer")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionProducer for OpenAiProducer {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        let pending = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&RequestBody {
                model: &request.model,
                messages: &request.messages,
                stream: true,
                temperature: request.temperature,
                max_tokens: request.max_output_tokens,
            });

        let open = async move {
            let response = pending
                .send()
                .await
                .map_err(|e| ProducerError::Request(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProducerError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(response.bytes_stream())
        };

        stream::once(open)
            .map(|opened| match opened {
                Ok(body) => sse_fragments(body).boxed(),
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .flatten()
            .boxed()
    }
}

#[derive(Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Extracts the text delta of one `data:` payload, if it carries any.
fn parse_chunk(data: &str) -> Result<Option<String>, ProducerError> {
    let event: ChunkEvent =
        serde_json::from_str(data).map_err(|e| ProducerError::Malformed(e.to_string()))?;
    if let Some(error) = event.error {
        return Err(ProducerError::Api(error.message));
    }
    Ok(event
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

/// Line-oriented server-sent event decoder.
///
/// Buffers raw bytes so that multi-byte characters split across network
/// chunks are only decoded once their line is complete.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<Result<String, ProducerError>>) {
        self.buffer.extend_from_slice(chunk);
        while !self.done {
            let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.decode_line(&line, out);
        }
    }

    fn finish(&mut self, out: &mut VecDeque<Result<String, ProducerError>>) {
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, out);
        }
        self.done = true;
    }

    fn decode_line(&mut self, raw: &[u8], out: &mut VecDeque<Result<String, ProducerError>>) {
        let line = String::from_utf8_lossy(raw);
        // event:, id:, retry:, comments and blank separators carry no text
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == DONE_MARKER {
            self.done = true;
            return;
        }
        match parse_chunk(data) {
            Ok(Some(text)) => out.push_back(Ok(text)),
            Ok(None) => {}
            Err(err) => {
                out.push_back(Err(err));
                self.done = true;
            }
        }
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ProducerError>>,
    finished: bool,
}

/// Adapts a raw response body into a fragment stream that ends after the
/// first error.
fn sse_fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String, ProducerError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.finished = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.finished || st.decoder.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.feed(chunk.as_ref(), &mut st.pending),
                Some(Err(err)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(ProducerError::Stream(err.to_string())));
                }
                None => {
                    st.finished = true;
                    st.decoder.finish(&mut st.pending);
                }
            }
        }
    })
}
