use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::EventRecord;

/// One page of a map event. Only the command list is interpreted; everything else rides along.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub list: Vec<EventRecord>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEvent {
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapFile {
    pub events: Vec<Option<MapEvent>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonEvent {
    pub list: Vec<EventRecord>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Items, armors, skills and weapons: everything with a name, a description and a note.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ItemRecord {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    pub fn has_text(&self) -> bool {
        !self.name.is_empty() || !self.description().is_empty() || !self.note.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Actors,
    Armors,
    Classes,
    CommonEvents,
    Enemies,
    Items,
    Skills,
    Weapons,
}

impl RecordKind {
    /// Sniffs the collection type from its first real element (element 0 is always null).
    pub fn detect(sample: &Map<String, Value>) -> Option<Self> {
        let has = |k: &str| sample.contains_key(k);
        if has("characterName") {
            Some(Self::Actors)
        } else if has("atypeId") && has("etypeId") {
            Some(Self::Armors)
        } else if has("expParams") && has("learnings") {
            Some(Self::Classes)
        } else if has("switchId") && has("trigger") {
            Some(Self::CommonEvents)
        } else if has("battlerHue") {
            Some(Self::Enemies)
        } else if has("consumable") {
            Some(Self::Items)
        } else if has("requiredWtypeId1") {
            Some(Self::Skills)
        } else if has("wtypeId") && has("etypeId") {
            Some(Self::Weapons)
        } else {
            None
        }
    }

    pub fn is_item_like(self) -> bool {
        matches!(self, Self::Armors | Self::Items | Self::Skills | Self::Weapons)
    }
}

/// A loaded data file, discriminated by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum GameDocument {
    Map(MapFile),
    CommonEvents(Vec<Option<CommonEvent>>),
    ItemLike {
        kind: RecordKind,
        records: Vec<Option<ItemRecord>>,
    },
    /// Recognised but carries no translatable script (actors, classes, enemies).
    Passive { kind: RecordKind, raw: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unrecognized document shape")]
    Unrecognized,
    #[error("invalid {kind} document: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl GameDocument {
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let is_map = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("autoplayBgm"));
        if is_map {
            let map = serde_json::from_value(value)
                .map_err(|source| DocumentError::Invalid { kind: "map", source })?;
            return Ok(Self::Map(map));
        }

        let kind = match &value {
            Value::Array(items) if items.len() >= 2 => items[1]
                .as_object()
                .and_then(RecordKind::detect)
                .ok_or(DocumentError::Unrecognized)?,
            _ => return Err(DocumentError::Unrecognized),
        };
        if kind == RecordKind::CommonEvents {
            let list = serde_json::from_value(value).map_err(|source| DocumentError::Invalid {
                kind: "common events",
                source,
            })?;
            Ok(Self::CommonEvents(list))
        } else if kind.is_item_like() {
            let records = serde_json::from_value(value).map_err(|source| DocumentError::Invalid {
                kind: "item list",
                source,
            })?;
            Ok(Self::ItemLike { kind, records })
        } else {
            Ok(Self::Passive { kind, raw: value })
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::Map(map) => serde_json::to_value(map),
            Self::CommonEvents(list) => serde_json::to_value(list),
            Self::ItemLike { records, .. } => serde_json::to_value(records),
            Self::Passive { raw, .. } => Ok(raw.clone()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Map(_) => "map".to_string(),
            Self::CommonEvents(_) => "common events".to_string(),
            Self::ItemLike { kind, .. } | Self::Passive { kind, .. } => format!("{kind:?}"),
        }
    }
}
