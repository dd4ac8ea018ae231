use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde_json::{Map, Value};

use crate::ir::{ContainerKind, ContainerValue};

pub const DEFAULT_KNOWLEDGE_DB: &str = "knowledge_db.toml";
pub const DEFAULT_SAMPLES: &str = "sample.json";

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Rolling window of past exchanges for one container. Holds at most `2 * pairs` turns.
#[derive(Clone, Debug)]
pub struct History {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl History {
    pub fn new(pairs: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: pairs * 2,
        }
    }

    pub fn push_exchange(&mut self, user: String, assistant: String) {
        for turn in [
            ChatTurn { role: Role::User, content: user },
            ChatTurn { role: Role::Assistant, content: assistant },
        ] {
            if self.max_turns == 0 {
                return;
            }
            if self.turns.len() == self.max_turns {
                self.turns.pop_front();
            }
            self.turns.push_back(turn);
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub prompt: String,
    pub stop: Vec<String>,
}

/// Renders a conversation into one raw prompt ending at the assistant's generation point.
pub trait ChatTemplate: Send + Sync + Debug {
    fn name(&self) -> &'static str;
    fn render(&self, system: &str, history: &History, user: &str) -> RenderedPrompt;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChatMl;

impl ChatTemplate for ChatMl {
    fn name(&self) -> &'static str {
        "chatml"
    }

    fn render(&self, system: &str, history: &History, user: &str) -> RenderedPrompt {
        let mut out = String::new();
        let mut push = |role: &str, content: &str| {
            out.push_str(&format!("<|im_start|>{role}\n{content}<|im_end|>\n"));
        };
        push("system", system);
        for turn in history.turns() {
            push(turn.role.as_str(), &turn.content);
        }
        push("user", user);
        out.push_str("<|im_start|>assistant\n");
        RenderedPrompt {
            prompt: out,
            stop: vec!["<|im_end|>".to_string(), "<|im_start|>".to_string()],
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Alpaca;

impl ChatTemplate for Alpaca {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    fn render(&self, system: &str, history: &History, user: &str) -> RenderedPrompt {
        let mut out = format!("{system}\n\n");
        for turn in history.turns() {
            match turn.role {
                Role::Assistant => out.push_str(&format!("### Response:\n{}\n\n", turn.content)),
                _ => out.push_str(&format!("### Instruction:\n{}\n\n", turn.content)),
            }
        }
        out.push_str(&format!("### Instruction:\n{user}\n\n### Response:\n"));
        RenderedPrompt {
            prompt: out,
            stop: vec!["### Instruction:".to_string()],
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Llama3;

impl ChatTemplate for Llama3 {
    fn name(&self) -> &'static str {
        "llama3"
    }

    fn render(&self, system: &str, history: &History, user: &str) -> RenderedPrompt {
        let mut out = String::from("<|begin_of_text|>");
        let mut push = |role: &str, content: &str| {
            out.push_str(&format!(
                "<|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>"
            ));
        };
        push("system", system);
        for turn in history.turns() {
            push(turn.role.as_str(), &turn.content);
        }
        push("user", user);
        out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        RenderedPrompt {
            prompt: out,
            stop: vec!["<|eot_id|>".to_string()],
        }
    }
}

pub fn template_by_name(name: &str) -> anyhow::Result<Arc<dyn ChatTemplate>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "chatml" => Ok(Arc::new(ChatMl)),
        "alpaca" => Ok(Arc::new(Alpaca)),
        "llama3" | "llama-3" => Ok(Arc::new(Llama3)),
        other => Err(anyhow!(
            "unknown chat template: {other} (expected chatml, alpaca or llama3)"
        )),
    }
}

/// Everything the system prompt is built from.
#[derive(Clone, Debug)]
pub struct PromptSettings {
    pub system: String,
    pub batch: usize,
    pub history: usize,
    pub source_lang: String,
    pub dest_lang: String,
    pub modes: BTreeMap<String, String>,
    /// Fixed term translations, in file order.
    pub db: Vec<(String, String)>,
    pub sample_in: Value,
    pub sample_out: Value,
}

/// Builds requests for one run. Immutable once constructed; shared by every worker.
#[derive(Clone, Debug)]
pub struct PromptBuilder {
    settings: PromptSettings,
    template: Arc<dyn ChatTemplate>,
}

impl PromptBuilder {
    pub fn new(settings: PromptSettings, template: Arc<dyn ChatTemplate>) -> Self {
        Self { settings, template }
    }

    pub fn settings(&self) -> &PromptSettings {
        &self.settings
    }

    #[cfg(test)]
    pub(crate) fn template(&self) -> &Arc<dyn ChatTemplate> {
        &self.template
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch.max(1)
    }

    /// `["k": "v"; "k2": "v2"]`
    pub fn db_text(&self) -> String {
        let entries: Vec<String> = self
            .settings
            .db
            .iter()
            .map(|(k, v)| format!("\"{k}\": \"{v}\""))
            .collect();
        format!("[{}]", entries.join("; "))
    }

    pub fn system_prompt(&self, kind: ContainerKind) -> anyhow::Result<String> {
        let mode = self
            .settings
            .modes
            .get(kind.mode_key())
            .with_context(|| format!("no [prompts.modes] entry for {:?}", kind.mode_key()))?;
        let db = self.db_text();
        let sample_in = serde_json::to_string_pretty(&self.settings.sample_in)?;
        let sample_out = serde_json::to_string_pretty(&self.settings.sample_out)?;
        Ok(render_template(
            &self.settings.system,
            &[
                ("db_data", db.as_str()),
                ("source_lang", self.settings.source_lang.as_str()),
                ("dest_lang", self.settings.dest_lang.as_str()),
                ("mode", mode.as_str()),
                ("sample_in", sample_in.as_str()),
                ("sample_out", sample_out.as_str()),
            ],
        ))
    }

    /// Splits a container's entries into request-sized chunks, keeping insertion order.
    pub fn chunks<'a>(
        &self,
        entries: &'a [(String, ContainerValue)],
    ) -> std::slice::Chunks<'a, (String, ContainerValue)> {
        entries.chunks(self.batch_size())
    }

    /// Text the model's reply is primed with; it is also prepended to the reply before parsing.
    pub fn assistant_prefix(&self) -> String {
        format!("Translated {}:\n```json", self.settings.dest_lang)
    }

    pub fn render(&self, system: &str, history: &History, user: &str) -> RenderedPrompt {
        let mut rendered = self.template.render(system, history, user);
        rendered.prompt.push_str(&self.assistant_prefix());
        rendered
    }
}

/// Pretty-printed fenced JSON object, as shown to and expected from the model.
pub fn wrap_json<'a>(entries: impl IntoIterator<Item = (&'a str, &'a ContainerValue)>) -> String {
    let map: Map<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_json()))
        .collect();
    let body = serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_else(|_| "{}".into());
    format!("```json\n{body}\n```")
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a professional game translator. Translate RPG dialogue and database text from {{source_lang}} to {{dest_lang}}.

Rules:
- Input is a JSON object. Reply with a JSON object with exactly the same keys, inside a ```json fenced block.
- A value that is a list must be answered with a list of the same length.
- Translate every value completely; leave no {{source_lang}} text behind.
- Keep control codes such as \C[2], \N[1], \V[3] and <tags> unchanged.
- Keep 「」 quote brackets when the source has them.

Use these fixed translations for names and terms:
{{db_data}}

{{mode}}

Example input:
```json
{{sample_in}}
```

Example output:
```json
{{sample_out}}
```"#;

pub const DEFAULT_EVENT_MODE: &str = "The values are lines of in-game dialogue, choices and popup messages. A two-element list is [speaker name, dialogue].";

pub const DEFAULT_ITEM_MODE: &str = "The values are [name, description, note] triples for items, skills, weapons and armor. Leave an empty string empty.";

pub const DEFAULT_KNOWLEDGE_DB_TEXT: &str = r#"# Fixed term translations used in every prompt.
[db]
"勇者" = "Hero"
"魔王" = "Demon King"
"#;

pub const DEFAULT_SAMPLES_TEXT: &str = r#"[
  {
    "L_00": ["アリス", "「おはよう！今日もいい天気だね。」"],
    "L_03": ["はい", "いいえ"]
  },
  {
    "L_00": ["Alice", "「Good morning! Nice weather again today.」"],
    "L_03": ["Yes", "No"]
  }
]
"#;
