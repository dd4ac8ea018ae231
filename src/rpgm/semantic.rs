use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::textutil::{wrap_text, WRAP_WIDTH};

use super::event::{EventRecord, ScriptError, ADD_TEXT, SHOW_TEXT};

// KMS_MapActiveMessage annotation, e.g. `<ActiveMessage:Hello>` or the Japanese tag alias.
static ACTIVE_MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:アクティブメッセージ|(?i:activemessage))\s*[:\s]\s*([^>]+)>")
        .expect("active message regex")
});

/// Higher-level unit produced by decompiling a command list.
#[derive(Clone, Debug, PartialEq)]
pub enum SemanticEvent {
    Text(TextBlock),
    Choice(ChoiceBlock),
    ActiveMessage(ActiveMessage),
    Raw(EventRecord),
}

/// A show-text header plus its merged dialogue lines.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlock {
    pub speaker: Option<String>,
    pub is_predicted_speaker: bool,
    pub body: String,
    pub face_name: String,
    /// Usually an integer; some exports carry an empty string here.
    pub face_index: Value,
    pub background: i64,
    pub position: i64,
    pub indent: i64,
}

impl TextBlock {
    /// Expands back into a show-text header and reflowed add-text lines.
    ///
    /// A predicted speaker is written the way MV games show it: a nameless header followed by
    /// an add-text line holding the name. An explicit speaker goes into the fifth header slot.
    pub fn to_records(&self) -> Vec<EventRecord> {
        let face_index = match &self.face_index {
            Value::String(s) if s.is_empty() => Value::from(0),
            other => other.clone(),
        };
        let mut header = vec![
            Value::from(self.face_name.clone()),
            face_index,
            Value::from(self.background),
            Value::from(self.position),
        ];

        let mut out = Vec::new();
        match (&self.speaker, self.is_predicted_speaker) {
            (Some(name), true) => {
                out.push(EventRecord::new(SHOW_TEXT, self.indent, header));
                out.push(EventRecord::new(
                    ADD_TEXT,
                    self.indent,
                    vec![Value::from(name.clone())],
                ));
            }
            (Some(name), false) => {
                header.push(Value::from(name.clone()));
                out.push(EventRecord::new(SHOW_TEXT, self.indent, header));
            }
            (None, _) => out.push(EventRecord::new(SHOW_TEXT, self.indent, header)),
        }

        for line in wrap_text(&self.body, WRAP_WIDTH) {
            out.push(EventRecord::new(ADD_TEXT, self.indent, vec![Value::from(line)]));
        }
        out
    }
}

/// Typed view over a show-choices record; the options live in parameter 0.
#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceBlock {
    record: EventRecord,
}

impl ChoiceBlock {
    pub fn wrap(record: EventRecord, index: usize) -> Result<Self, ScriptError> {
        match record.parameters.first() {
            Some(Value::Array(_)) => Ok(Self { record }),
            _ => Err(ScriptError::ChoiceNotList { index }),
        }
    }

    pub fn indent(&self) -> i64 {
        self.record.indent
    }

    pub fn choices(&self) -> Vec<String> {
        match self.record.parameters.first() {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_choices(&mut self, choices: &[String]) {
        let list = Value::Array(choices.iter().cloned().map(Value::from).collect());
        match self.record.parameters.first_mut() {
            Some(slot) => *slot = list,
            None => self.record.parameters.push(list),
        }
    }

    pub fn into_record(self) -> EventRecord {
        self.record
    }
}

/// Comment record carrying an active-message plugin annotation.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveMessage {
    record: EventRecord,
}

impl ActiveMessage {
    pub fn wrap(record: EventRecord) -> Result<Self, EventRecord> {
        let matched = record
            .first_text()
            .map(|t| ACTIVE_MESSAGE_RE.is_match(t))
            .unwrap_or(false);
        if matched {
            Ok(Self { record })
        } else {
            Err(record)
        }
    }

    pub fn indent(&self) -> i64 {
        self.record.indent
    }

    pub fn text(&self) -> Option<String> {
        let raw = self.record.first_text()?;
        ACTIVE_MESSAGE_RE
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Rewrites the annotation in place. Newlines are escaped so the tag stays on one line, and
    /// `>` becomes its full-width form so it cannot close the tag.
    pub fn set_text(&mut self, value: &str) {
        let escaped = value
            .replace('\r', "\\r")
            .replace('\n', "\\n")
            .replace('>', "＞");
        let Some(raw) = self.record.first_text() else {
            return;
        };
        let Some(span) = ACTIVE_MESSAGE_RE.find(raw) else {
            return;
        };
        let rewritten = format!(
            "{}<ActiveMessage:{}>{}",
            &raw[..span.start()],
            escaped,
            &raw[span.end()..]
        );
        self.record.parameters[0] = Value::from(rewritten);
    }

    pub fn into_record(self) -> EventRecord {
        self.record
    }
}
