use tracing::warn;

use crate::ir::{ContainerKind, ContainerValue, TranslationContainer};

use super::event::{EventRecord, ScriptError};
use super::interpreter::ScriptTransformer;
use super::models::{GameDocument, ItemRecord};
use super::semantic::SemanticEvent;

pub fn line_key(index: usize) -> String {
    format!("L_{index:02}")
}

pub fn item_key(index: usize) -> String {
    format!("IT_{index:04}")
}

/// What a decompiled event contributes to its page's container, if anything.
pub fn extractable_value(event: &SemanticEvent) -> Option<ContainerValue> {
    match event {
        SemanticEvent::Text(block) => match block.speaker.as_deref() {
            Some(name) if !name.is_empty() => Some(ContainerValue::pair(name, &block.body)),
            _ if block.body.trim().is_empty() => None,
            _ => Some(ContainerValue::Text(block.body.clone())),
        },
        SemanticEvent::Choice(choice) => {
            let choices = choice.choices();
            (!choices.is_empty()).then_some(ContainerValue::List(choices))
        }
        SemanticEvent::ActiveMessage(msg) => msg
            .text()
            .filter(|t| !t.trim().is_empty())
            .map(ContainerValue::Text),
        SemanticEvent::Raw(_) => None,
    }
}

/// Builds the event container for one command list. Keys follow the position of each event in
/// the decompiled sequence, so they are stable for as long as the records are.
pub fn extract_script(
    transformer: &ScriptTransformer,
    records: &[EventRecord],
) -> Result<Option<TranslationContainer>, ScriptError> {
    let mut container = TranslationContainer::new(ContainerKind::Event);
    for (index, event) in transformer.decompile(records).enumerate() {
        if let Some(value) = extractable_value(&event?) {
            container.push(line_key(index), value);
        }
    }
    Ok((!container.is_empty()).then_some(container))
}

fn extract_items(records: &[Option<ItemRecord>]) -> Option<TranslationContainer> {
    let mut container = TranslationContainer::new(ContainerKind::Item);
    for (index, item) in records.iter().enumerate() {
        let Some(item) = item else { continue };
        if !item.has_text() {
            continue;
        }
        container.push(
            item_key(index),
            ContainerValue::List(vec![
                item.name.clone(),
                item.description().to_string(),
                item.note.clone(),
            ]),
        );
    }
    (!container.is_empty()).then_some(container)
}

/// Splits a document into translation containers.
///
/// Maps yield one slot per event page (a single `None` for an empty event slot); common events
/// yield one slot each; item-like lists share a single container. A script that fails to
/// decompile is logged and leaves a `None` in its slot.
pub fn prepare_containers(
    transformer: &ScriptTransformer,
    doc: &GameDocument,
    file: &str,
) -> Vec<Option<TranslationContainer>> {
    let script = |records: &[EventRecord], what: String| match extract_script(transformer, records) {
        Ok(container) => container,
        Err(err) => {
            warn!(file, script = %what, error = %err, "skipping script that failed to decompile");
            None
        }
    };

    match doc {
        GameDocument::Map(map) => {
            let mut out = Vec::new();
            for (event_idx, event) in map.events.iter().enumerate() {
                let Some(event) = event else {
                    out.push(None);
                    continue;
                };
                for (page_idx, page) in event.pages.iter().enumerate() {
                    out.push(script(&page.list, format!("event {event_idx} page {page_idx}")));
                }
            }
            out
        }
        GameDocument::CommonEvents(list) => list
            .iter()
            .enumerate()
            .map(|(idx, common)| {
                common
                    .as_ref()
                    .and_then(|c| script(&c.list, format!("common event {idx}")))
            })
            .collect(),
        GameDocument::ItemLike { records, .. } => vec![extract_items(records)],
        GameDocument::Passive { .. } => Vec::new(),
    }
}
