use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const SHOW_TEXT: i64 = 101;
pub const SHOW_CHOICES: i64 = 102;
pub const COMMENT: i64 = 108;
pub const COMMENT_MORE: i64 = 408;
pub const ADD_TEXT: i64 = 401;

/// One raw event command: numeric code, indentation level and a parameter list whose shape
/// depends on the code.
///
/// Negative codes are reserved for synthetic records that must be expanded before they are
/// written back out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub code: i64,
    #[serde(default)]
    pub indent: i64,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl EventRecord {
    pub fn new(code: i64, indent: i64, parameters: Vec<Value>) -> Self {
        Self {
            code,
            indent,
            parameters,
        }
    }

    /// First parameter as text, when it is one.
    pub fn first_text(&self) -> Option<&str> {
        self.parameters.first().and_then(Value::as_str)
    }

    pub fn is_synthetic(&self) -> bool {
        self.code < 0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("non-conforming code {code} reached compile")]
    NegativeCode { code: i64 },
    #[error("choice record at {index} has no list in parameter 0")]
    ChoiceNotList { index: usize },
    #[error("show-text record at {index}: {reason}")]
    MalformedShowText { index: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_record_without_indent() {
        let rec: EventRecord =
            serde_json::from_value(json!({"code": 401, "parameters": ["hi"]})).expect("record");
        assert_eq!(rec.indent, 0);
        assert_eq!(rec.first_text(), Some("hi"));
        assert!(!rec.is_synthetic());
    }
}
