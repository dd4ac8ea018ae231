use std::collections::VecDeque;

use serde_json::Value;

use crate::textutil::starts_with_open_bracket;

use super::event::{
    EventRecord, ScriptError, ADD_TEXT, COMMENT, COMMENT_MORE, SHOW_CHOICES, SHOW_TEXT,
};
use super::semantic::{ActiveMessage, ChoiceBlock, SemanticEvent, TextBlock};

/// Longest line (in characters) still considered a speaker label.
pub const MAX_SPEAKER_CHARS: usize = 40;

/// Converts command lists to semantic events and back. Holds only configuration, so one
/// instance can be shared by every worker.
#[derive(Clone, Copy, Debug)]
pub struct ScriptTransformer {
    pub predict_speakers: bool,
}

impl ScriptTransformer {
    pub fn new(predict_speakers: bool) -> Self {
        Self { predict_speakers }
    }

    /// Starts a fresh single-pass scan over `records`. Decompiling again needs a new call.
    pub fn decompile<'a>(&self, records: &'a [EventRecord]) -> Decompiler<'a> {
        Decompiler {
            records,
            cursor: 0,
            predict_speakers: self.predict_speakers,
            done: false,
        }
    }

    pub fn decompile_all(&self, records: &[EventRecord]) -> Result<Vec<SemanticEvent>, ScriptError> {
        self.decompile(records).collect()
    }

    /// Lazily expands semantic events back into records. Must be driven to exhaustion for the
    /// full list to be produced.
    pub fn compile<I>(&self, events: I) -> Compiler<I::IntoIter>
    where
        I: IntoIterator<Item = SemanticEvent>,
    {
        Compiler {
            events: events.into_iter(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    pub fn compile_all<I>(&self, events: I) -> Result<Vec<EventRecord>, ScriptError>
    where
        I: IntoIterator<Item = SemanticEvent>,
    {
        self.compile(events).collect()
    }
}

/// Cursor-driven scan. Each step consumes one or more records; the first error ends the scan.
#[derive(Debug)]
pub struct Decompiler<'a> {
    records: &'a [EventRecord],
    cursor: usize,
    predict_speakers: bool,
    done: bool,
}

impl<'a> Decompiler<'a> {
    fn step(&mut self) -> Result<SemanticEvent, ScriptError> {
        let records = self.records;
        let index = self.cursor;
        let record = &records[index];
        match record.code {
            SHOW_TEXT => self.show_text(),
            SHOW_CHOICES => {
                self.cursor += 1;
                ChoiceBlock::wrap(record.clone(), index).map(SemanticEvent::Choice)
            }
            COMMENT | COMMENT_MORE => {
                self.cursor += 1;
                Ok(match ActiveMessage::wrap(record.clone()) {
                    Ok(msg) => SemanticEvent::ActiveMessage(msg),
                    Err(raw) => SemanticEvent::Raw(raw),
                })
            }
            _ => {
                self.cursor += 1;
                Ok(SemanticEvent::Raw(record.clone()))
            }
        }
    }

    fn show_text(&mut self) -> Result<SemanticEvent, ScriptError> {
        let records = self.records;
        let index = self.cursor;
        let header = &records[index];
        let malformed = |reason: &str| ScriptError::MalformedShowText {
            index,
            reason: reason.to_string(),
        };

        let params = &header.parameters;
        if params.len() != 4 && params.len() != 5 {
            return Err(malformed(&format!("expected 4 or 5 parameters, got {}", params.len())));
        }
        let face_name = params[0]
            .as_str()
            .ok_or_else(|| malformed("face name is not a string"))?
            .to_string();
        let face_index = params[1].clone();
        let background = params[2]
            .as_i64()
            .ok_or_else(|| malformed("background is not an integer"))?;
        let position = params[3]
            .as_i64()
            .ok_or_else(|| malformed("position is not an integer"))?;
        let mut speaker = match params.get(4) {
            Some(Value::String(name)) => Some(name.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(malformed("speaker name is not a string")),
        };
        self.cursor += 1;

        let mut predicted = false;
        let mut lines: Vec<String> = Vec::new();
        let mut first = true;
        while let Some(rec) = records.get(self.cursor) {
            if rec.code != ADD_TEXT {
                break;
            }
            let line = rec
                .first_text()
                .ok_or_else(|| ScriptError::MalformedShowText {
                    index: self.cursor,
                    reason: "text line is not a string".to_string(),
                })?
                .to_string();

            if first && self.predict_speakers && speaker.is_none() {
                let next = records.get(self.cursor + 1);
                if next.is_some_and(|n| n.code == ADD_TEXT && is_speaker_label(&line, n)) {
                    speaker = Some(line);
                    predicted = true;
                    first = false;
                    self.cursor += 1;
                    continue;
                }
            }
            first = false;
            lines.push(line);
            self.cursor += 1;
        }

        let body = if !self.predict_speakers || speaker.is_none() {
            lines.join("\n")
        } else {
            lines.join(" ")
        };
        Ok(SemanticEvent::Text(TextBlock {
            speaker,
            is_predicted_speaker: predicted,
            body,
            face_name,
            face_index,
            background,
            position,
            indent: header.indent,
        }))
    }
}

impl Iterator for Decompiler<'_> {
    type Item = Result<SemanticEvent, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor >= self.records.len() {
            return None;
        }
        let out = self.step();
        if out.is_err() {
            self.done = true;
        }
        Some(out)
    }
}

/// A short line reads as a speaker label when the next line opens a quote.
pub fn is_speaker_label(line: &str, next: &EventRecord) -> bool {
    if line.chars().count() > MAX_SPEAKER_CHARS {
        return false;
    }
    next.first_text().is_some_and(starts_with_open_bracket)
}

#[derive(Debug)]
pub struct Compiler<I> {
    events: I,
    pending: VecDeque<EventRecord>,
    done: bool,
}

impl<I> Iterator for Compiler<I>
where
    I: Iterator<Item = SemanticEvent>,
{
    type Item = Result<EventRecord, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rec) = self.pending.pop_front() {
            return Some(Ok(rec));
        }
        if self.done {
            return None;
        }
        let event = self.events.next()?;
        let rec = match event {
            SemanticEvent::Text(block) => {
                self.pending.extend(block.to_records());
                self.pending.pop_front()?
            }
            SemanticEvent::Choice(choice) => choice.into_record(),
            SemanticEvent::ActiveMessage(msg) => msg.into_record(),
            SemanticEvent::Raw(rec) if rec.is_synthetic() => {
                self.done = true;
                return Some(Err(ScriptError::NegativeCode { code: rec.code }));
            }
            SemanticEvent::Raw(rec) => rec,
        };
        Some(Ok(rec))
    }
}
