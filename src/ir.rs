use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of records a container was extracted from; selects the prompt mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Event,
    Item,
}

impl ContainerKind {
    pub fn mode_key(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Item => "item",
        }
    }
}

/// A translatable value: bare text, or an ordered list (choices, name+text,
/// name+description+note).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContainerValue {
    Text(String),
    List(Vec<String>),
}

impl ContainerValue {
    pub fn pair(first: &str, second: &str) -> Self {
        Self::List(vec![first.to_string(), second.to_string()])
    }

    /// Reads a model-produced JSON value. Lists must hold only strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::from(s.clone()),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::from).collect()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            Self::Text(_) => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Text(_) => 1,
            Self::List(items) => items.len(),
        }
    }

    /// Key used in the dump file; lists are written as their JSON array text.
    pub fn dump_key(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(_) => self.to_json().to_string(),
        }
    }

    pub fn map_strings(&self, f: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Text(s) => Self::Text(f(s.as_str())),
            Self::List(items) => Self::List(items.iter().map(|s| f(s.as_str())).collect()),
        }
    }
}

/// A batch of extracted text keyed by synthetic positional keys, plus whatever the model has
/// translated so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationContainer {
    pub kind: ContainerKind,
    /// Insertion-ordered; chunking follows this order.
    pub source: Vec<(String, ContainerValue)>,
    /// Upper-cased keys.
    #[serde(default)]
    pub translated: BTreeMap<String, ContainerValue>,
}

impl TranslationContainer {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            source: Vec::new(),
            translated: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: ContainerValue) {
        self.source.push((key.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.source.iter().map(|(k, _)| k.as_str())
    }

    /// Looks up a translation, tolerating key case drift.
    pub fn translated_value(&self, key: &str) -> Option<&ContainerValue> {
        self.translated.get(&key.to_uppercase())
    }

    pub fn merge_translated(&mut self, accepted: impl IntoIterator<Item = (String, ContainerValue)>) {
        for (k, v) in accepted {
            self.translated.insert(k.to_uppercase(), v);
        }
    }

    pub fn missing_keys(&self) -> Vec<&str> {
        self.keys()
            .filter(|k| self.translated_value(k).is_none())
            .collect()
    }
}

/// Original-value → translated-value view over one or more containers. Built on demand;
/// later containers overwrite earlier ones on identical originals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatMapping {
    entries: HashMap<ContainerValue, ContainerValue>,
}

impl FlatMapping {
    pub fn build<'a>(containers: impl IntoIterator<Item = Option<&'a TranslationContainer>>) -> Self {
        let mut entries = HashMap::new();
        for container in containers.into_iter().flatten() {
            for (key, original) in &container.source {
                if let Some(tl) = container.translated_value(key) {
                    entries.insert(original.clone(), tl.clone());
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, original: &ContainerValue) -> Option<&ContainerValue> {
        self.entries.get(original)
    }

    pub fn get_text(&self, original: &str) -> Option<&ContainerValue> {
        self.entries.get(&ContainerValue::Text(original.to_string()))
    }

    /// String-keyed form written next to the patched file, sorted for stable diffs.
    pub fn to_dump(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.dump_key(), v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TranslationContainer {
        let mut c = TranslationContainer::new(ContainerKind::Event);
        c.push("L_00", ContainerValue::Text("こんにちは".into()));
        c.push("L_02", ContainerValue::pair("アリス", "「やあ」"));
        c.push("L_05", ContainerValue::List(vec!["はい".into(), "いいえ".into()]));
        c
    }

    #[test]
    fn key_order_is_stable() {
        let c = sample();
        let first: Vec<&str> = c.keys().collect();
        let second: Vec<&str> = c.keys().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["L_00", "L_02", "L_05"]);
    }

    #[test]
    fn translated_lookup_is_case_insensitive() {
        let mut c = sample();
        c.merge_translated([("l_00".to_string(), ContainerValue::Text("Hello".into()))]);
        assert_eq!(
            c.translated_value("L_00"),
            Some(&ContainerValue::Text("Hello".into()))
        );
        assert!(c.translated.contains_key("L_00"));
        assert_eq!(c.missing_keys(), vec!["L_02", "L_05"]);
    }

    #[test]
    fn flat_mapping_skips_untranslated_keys() {
        let mut c = sample();
        c.merge_translated([
            ("L_00".to_string(), ContainerValue::Text("Hello".into())),
            ("L_05".to_string(), ContainerValue::List(vec!["Yes".into(), "No".into()])),
        ]);
        let map = FlatMapping::build([Some(&c), None]);
        assert_eq!(map.to_dump().len(), 2);
        assert_eq!(map.get_text("こんにちは"), Some(&ContainerValue::Text("Hello".into())));
        assert_eq!(
            map.get(&ContainerValue::List(vec!["はい".into(), "いいえ".into()])),
            Some(&ContainerValue::List(vec!["Yes".into(), "No".into()]))
        );
        assert!(map.get(&ContainerValue::pair("アリス", "「やあ」")).is_none());
    }

    #[test]
    fn later_containers_win_on_collision() {
        let mut a = TranslationContainer::new(ContainerKind::Event);
        a.push("L_00", ContainerValue::Text("同じ".into()));
        a.merge_translated([("L_00".to_string(), ContainerValue::Text("first".into()))]);
        let mut b = a.clone();
        b.translated.clear();
        b.merge_translated([("L_00".to_string(), ContainerValue::Text("second".into()))]);
        let map = FlatMapping::build([Some(&a), Some(&b)]);
        assert_eq!(map.get_text("同じ"), Some(&ContainerValue::Text("second".into())));
    }

    #[test]
    fn dump_serializes_list_keys_as_json_text() {
        let mut c = sample();
        c.merge_translated([("L_02".to_string(), ContainerValue::pair("Alice", "\"Hi\""))]);
        let dump = FlatMapping::build([Some(&c)]).to_dump();
        assert_eq!(dump.get(r#"["アリス","「やあ」"]"#), Some(&json!(["Alice", "\"Hi\""])));
    }

    #[test]
    fn value_from_json_requires_string_lists() {
        assert_eq!(ContainerValue::from_json(&json!("a")), Some(ContainerValue::Text("a".into())));
        assert_eq!(
            ContainerValue::from_json(&json!(["a", "b"])),
            Some(ContainerValue::pair("a", "b"))
        );
        assert_eq!(ContainerValue::from_json(&json!(["a", 1])), None);
        assert_eq!(ContainerValue::from_json(&json!({"a": "b"})), None);
    }
}
