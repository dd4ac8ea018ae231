use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ir::ContainerValue;
use crate::textutil::{contains_source_script, has_quote_brackets, normalize_punctuation};

static JSON_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json(.*?)```").expect("json fence regex"));

/// How many bracket-parity mismatches are rejected per key before the mismatch is tolerated.
pub const BRACKET_MISMATCH_LIMIT: u32 = 3;

/// A completion that cannot be accepted. Every variant is retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseRejection {
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion stream interrupted: {0}")]
    Interrupted(String),
    #[error("no fenced json block in response")]
    MissingFence,
    #[error("response json does not parse: {0}")]
    Parse(String),
    #[error("response json is not an object")]
    NotAnObject,
    #[error("expected {expected} keys, got {actual}")]
    KeyCount { expected: usize, actual: usize },
    #[error("response still contains source-script text in {key}")]
    SourceScript { key: String },
    #[error("key {key} missing from response")]
    MissingKey { key: String },
    #[error("key {key} does not match the requested type")]
    TypeMismatch { key: String },
    #[error("key {key}: expected {expected} list items, got {actual}")]
    ListLength {
        key: String,
        expected: usize,
        actual: usize,
    },
    #[error("key {key} does not match quote brackets")]
    BracketParity { key: String },
}

/// Per-key count of rejected bracket-parity mismatches. One instance lives for a whole
/// container, so leniency earned on one chunk carries over to the next.
#[derive(Clone, Debug, Default)]
pub struct BracketTolerance {
    rejected: HashMap<String, u32>,
}

impl BracketTolerance {
    /// Records a mismatch on `key`; returns true when it must still be rejected.
    pub fn reject(&mut self, key: &str) -> bool {
        let count = self.rejected.entry(key.to_string()).or_insert(0);
        if *count < BRACKET_MISMATCH_LIMIT {
            *count += 1;
            true
        } else {
            false
        }
    }

    pub fn rejected(&self, key: &str) -> u32 {
        self.rejected.get(key).copied().unwrap_or(0)
    }
}

/// Body of the first ```json fence.
pub fn extract_fenced_json(text: &str) -> Option<&str> {
    JSON_FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn parse_response(text: &str) -> Result<Map<String, Value>, ResponseRejection> {
    let body = extract_fenced_json(text).ok_or(ResponseRejection::MissingFence)?;
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ResponseRejection::NotAnObject),
        Err(err) => Err(ResponseRejection::Parse(err.to_string())),
    }
}

fn value_has_source_script(value: &Value) -> bool {
    match value {
        Value::String(s) => contains_source_script(s),
        Value::Array(items) => items.iter().any(value_has_source_script),
        Value::Object(map) => map.values().any(value_has_source_script),
        _ => false,
    }
}

/// Checks a parsed response against the chunk that was requested. On success returns the
/// accepted pairs with upper-cased keys and normalized punctuation, in request order.
pub fn validate_response(
    request: &[(String, ContainerValue)],
    response: &Map<String, Value>,
    tolerance: &mut BracketTolerance,
) -> Result<Vec<(String, ContainerValue)>, ResponseRejection> {
    if response.len() != request.len() {
        return Err(ResponseRejection::KeyCount {
            expected: request.len(),
            actual: response.len(),
        });
    }
    if let Some((key, _)) = response.iter().find(|(_, v)| value_has_source_script(v)) {
        return Err(ResponseRejection::SourceScript { key: key.clone() });
    }

    let upper: HashMap<String, &Value> = response
        .iter()
        .map(|(k, v)| (k.to_uppercase(), v))
        .collect();

    let mut accepted = Vec::with_capacity(request.len());
    for (key, original) in request {
        let key = key.to_uppercase();
        let raw = upper
            .get(&key)
            .ok_or_else(|| ResponseRejection::MissingKey { key: key.clone() })?;
        let translated = match (original, ContainerValue::from_json(raw)) {
            (ContainerValue::Text(_), Some(tl @ ContainerValue::Text(_))) => tl,
            (ContainerValue::List(src), Some(ContainerValue::List(tl))) => {
                if src.len() != tl.len() {
                    return Err(ResponseRejection::ListLength {
                        key,
                        expected: src.len(),
                        actual: tl.len(),
                    });
                }
                ContainerValue::List(tl)
            }
            _ => return Err(ResponseRejection::TypeMismatch { key }),
        };

        if let (ContainerValue::Text(src), ContainerValue::Text(tl)) = (original, &translated) {
            if has_quote_brackets(src) != has_quote_brackets(tl) && tolerance.reject(&key) {
                return Err(ResponseRejection::BracketParity { key });
            }
        }
        accepted.push((key, translated.map_strings(normalize_punctuation)));
    }
    Ok(accepted)
}
