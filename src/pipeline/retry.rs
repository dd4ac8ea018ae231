use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ir::ContainerValue;
use crate::models::{CompletionClient, CompletionRequest};
use crate::quality::{parse_response, validate_response, BracketTolerance, ResponseRejection};

use super::prompts::RenderedPrompt;

pub const MAX_ATTEMPTS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("gave up after {attempts} attempts; last rejection: {last}")]
pub struct GaveUp {
    pub attempts: usize,
    pub last: ResponseRejection,
}

/// Sends one chunk to the completion service until a response passes validation or the
/// attempt budget runs out. Every failure, transport or validation, costs one attempt.
#[derive(Clone)]
pub struct ValidatingRetrier {
    client: Arc<dyn CompletionClient>,
    model: String,
    params: Map<String, Value>,
    max_attempts: usize,
}

impl ValidatingRetrier {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            client,
            model: model.into(),
            params,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub async fn translate_chunk(
        &self,
        prompt: &RenderedPrompt,
        prefix: &str,
        chunk: &[(String, ContainerValue)],
        tolerance: &mut BracketTolerance,
    ) -> Result<Vec<(String, ContainerValue)>, GaveUp> {
        let mut last = ResponseRejection::MissingFence;
        for attempt in 1..=self.max_attempts {
            match self.attempt(prompt, prefix, chunk, tolerance).await {
                Ok(accepted) => {
                    debug!(attempt, keys = accepted.len(), "chunk accepted");
                    return Ok(accepted);
                }
                Err(rejection) => {
                    warn!(
                        attempt,
                        left = self.max_attempts - attempt,
                        reason = %rejection,
                        "rejected completion"
                    );
                    last = rejection;
                }
            }
        }
        Err(GaveUp {
            attempts: self.max_attempts,
            last,
        })
    }

    async fn attempt(
        &self,
        prompt: &RenderedPrompt,
        prefix: &str,
        chunk: &[(String, ContainerValue)],
        tolerance: &mut BracketTolerance,
    ) -> Result<Vec<(String, ContainerValue)>, ResponseRejection> {
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: prompt.prompt.clone(),
            stop: prompt.stop.clone(),
            params: self.params.clone(),
        };
        let mut stream = self
            .client
            .complete(request)
            .await
            .map_err(|err| ResponseRejection::Request(err.to_string()))?;

        let mut text = prefix.to_string();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|err| ResponseRejection::Interrupted(err.to_string()))?;
            text.push_str(&fragment);
        }

        let response = parse_response(&text).inspect_err(|_| debug!(response = %text, "unusable response"))?;
        validate_response(chunk, &response, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::models::{CompletionError, CompletionStream};

    /// Replies from a fixed script; `None` stands for a broken stream.
    struct Scripted {
        replies: Mutex<VecDeque<Option<&'static str>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
            *self.calls.lock().expect("lock") += 1;
            let reply = self.replies.lock().expect("lock").pop_front().flatten();
            let items: Vec<Result<String, CompletionError>> = match reply {
                Some(text) => vec![Ok(text.to_string())],
                None => vec![
                    Ok("\n{\"L_00\":".to_string()),
                    Err(CompletionError::Interrupted("reset".into())),
                ],
            };
            Ok(futures::stream::iter(items).boxed())
        }
    }

    fn chunk() -> Vec<(String, ContainerValue)> {
        vec![("L_00".to_string(), ContainerValue::Text("やあ".into()))]
    }

    fn prompt() -> RenderedPrompt {
        RenderedPrompt {
            prompt: "p".into(),
            stop: vec![],
        }
    }

    #[tokio::test]
    async fn retries_until_valid_response() {
        let client = Scripted::new(vec![
            None,
            Some("\nnot json\n```"),
            Some("\n{\"L_00\": \"やあ\"}\n```"),
            Some("\n{\"l_00\": \"Hey！\"}\n```"),
        ]);
        let retrier = ValidatingRetrier::new(client.clone(), "m", Map::new());
        let mut tol = BracketTolerance::default();
        let accepted = retrier
            .translate_chunk(&prompt(), "```json", &chunk(), &mut tol)
            .await
            .expect("accepted");
        assert_eq!(accepted, vec![("L_00".to_string(), ContainerValue::Text("Hey!".into()))]);
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn every_failure_consumes_an_attempt() {
        let client = Scripted::new(vec![None; 12]);
        let retrier = ValidatingRetrier::new(client.clone(), "m", Map::new()).with_max_attempts(3);
        let mut tol = BracketTolerance::default();
        let err = retrier
            .translate_chunk(&prompt(), "```json", &chunk(), &mut tol)
            .await
            .expect_err("gives up");
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, ResponseRejection::Interrupted(_)));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn default_budget_is_ten_attempts() {
        let client = Scripted::new(vec![Some("no fence here"); 20]);
        let retrier = ValidatingRetrier::new(client.clone(), "m", Map::new());
        let mut tol = BracketTolerance::default();
        let err = retrier
            .translate_chunk(&prompt(), "", &chunk(), &mut tol)
            .await
            .expect_err("gives up");
        assert_eq!(err.last, ResponseRejection::MissingFence);
        assert_eq!(client.calls(), MAX_ATTEMPTS);
    }
}
