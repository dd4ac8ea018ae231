//! Boundary to the text-completion service.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

pub use openai::OpenAiCompletionClient;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion stream interrupted: {0}")]
    Interrupted(String),
}

/// One raw completion request: a fully rendered prompt plus the sequences that end it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub stop: Vec<String>,
    /// Passed through into the request body as-is.
    pub params: Map<String, Value>,
}

pub type CompletionStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Starts a streaming completion; the stream yields text fragments in order.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError>;
}
