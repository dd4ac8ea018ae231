use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;

use super::{CompletionClient, CompletionError, CompletionRequest, CompletionStream};

/// Streaming client for OpenAI-compatible `/completions` endpoints (llama.cpp server,
/// text-generation-webui, vLLM, ...).
#[derive(Clone, Debug)]
pub struct OpenAiCompletionClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, CompletionError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: trim_trailing_slash(base_url.into()),
            api_key: api_key.filter(|k| !k.is_empty()),
            http: builder.build()?,
        })
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        let mut body: Map<String, Value> = request.params.clone();
        body.insert("model".into(), Value::from(request.model.clone()));
        body.insert("prompt".into(), Value::from(request.prompt.clone()));
        body.insert(
            "stop".into(),
            Value::Array(request.stop.iter().cloned().map(Value::from).collect()),
        );
        body.insert("stream".into(), Value::Bool(true));
        Value::Object(body)
    }
}

fn trim_trailing_slash(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let url = format!("{}/completions", self.base_url);
        let mut builder = self.http.post(url).json(&self.body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(sse_text_stream(response.bytes_stream()))
    }
}

#[derive(Debug, PartialEq)]
enum Frame {
    Text(String),
    Done,
}

/// Line splitter for `text/event-stream` bodies. Only `data:` lines are meaningful.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame, CompletionError>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn finish(&mut self) -> Option<Result<Frame, CompletionError>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<Frame, CompletionError>> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(Ok(Frame::Done));
    }
    let event: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(err) => {
            return Some(Err(CompletionError::Interrupted(format!(
                "malformed stream event: {err}"
            ))))
        }
    };
    let text = event
        .pointer("/choices/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(Ok(Frame::Text(text.to_string())))
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, CompletionError>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Queues decoded frames; returns false once the stream is over.
    fn absorb(&mut self, frames: impl IntoIterator<Item = Result<Frame, CompletionError>>) -> bool {
        for frame in frames {
            match frame {
                Ok(Frame::Text(text)) if text.is_empty() => {}
                Ok(Frame::Text(text)) => self.pending.push_back(Ok(text)),
                Ok(Frame::Done) => return false,
                Err(err) => {
                    self.pending.push_back(Err(err));
                    return false;
                }
            }
        }
        true
    }
}

/// Turns a server-sent-event byte stream into completion text fragments. A transport error
/// mid-stream surfaces as [`CompletionError::Interrupted`] and ends the stream.
pub fn sse_text_stream<S, E>(bytes: S) -> CompletionStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(&chunk);
                    state.finished = !state.absorb(frames);
                }
                Some(Err(err)) => {
                    debug!(error = %err, "completion stream broke");
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(CompletionError::Interrupted(err.to_string())));
                }
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
