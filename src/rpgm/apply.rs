use tracing::{debug, info, warn};

use crate::ir::{ContainerValue, FlatMapping, TranslationContainer};

use super::event::EventRecord;
use super::extract::item_key;
use super::interpreter::ScriptTransformer;
use super::models::{GameDocument, ItemRecord};
use super::semantic::SemanticEvent;

/// Counts of substitutions made while patching one document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub text: usize,
    pub choices: usize,
    pub active_messages: usize,
    pub items: usize,
    pub scripts_recompiled: usize,
    pub unmatched: usize,
}

/// Writes translated containers back into a loaded document.
#[derive(Clone, Copy, Debug)]
pub struct ReapplyEngine {
    transformer: ScriptTransformer,
}

impl ReapplyEngine {
    pub fn new(transformer: ScriptTransformer) -> Self {
        Self { transformer }
    }

    pub fn apply(
        &self,
        doc: &mut GameDocument,
        containers: &[Option<TranslationContainer>],
        file: &str,
    ) -> ApplyStats {
        let mut stats = ApplyStats::default();
        match doc {
            GameDocument::Map(map) => {
                let mapping = FlatMapping::build(containers.iter().map(Option::as_ref));
                for event in map.events.iter_mut().flatten() {
                    for page in &mut event.pages {
                        self.patch_script(&mut page.list, &mapping, &mut stats, file);
                    }
                }
            }
            GameDocument::CommonEvents(list) => {
                let mapping = FlatMapping::build(containers.iter().map(Option::as_ref));
                for common in list.iter_mut().flatten() {
                    self.patch_script(&mut common.list, &mapping, &mut stats, file);
                }
            }
            GameDocument::ItemLike { records, .. } => {
                if let Some(Some(container)) = containers.first() {
                    apply_items(records, container, &mut stats);
                }
            }
            GameDocument::Passive { .. } => {}
        }
        info!(
            file,
            text = stats.text,
            choices = stats.choices,
            active_messages = stats.active_messages,
            items = stats.items,
            recompiled = stats.scripts_recompiled,
            unmatched = stats.unmatched,
            "applied translations"
        );
        stats
    }

    /// Re-decompiles `list` from its original records, substitutes every hit and recompiles only
    /// when something changed. Any script error leaves the list untouched.
    fn patch_script(
        &self,
        list: &mut Vec<EventRecord>,
        mapping: &FlatMapping,
        stats: &mut ApplyStats,
        file: &str,
    ) {
        let mut events = match self.transformer.decompile_all(list) {
            Ok(events) => events,
            Err(err) => {
                warn!(file, error = %err, "keeping script that failed to decompile");
                return;
            }
        };

        let mut local = ApplyStats::default();
        for event in &mut events {
            substitute(event, mapping, &mut local);
        }
        let dirty = local.text + local.choices + local.active_messages > 0;
        stats.unmatched += local.unmatched;
        if !dirty {
            return;
        }

        match self.transformer.compile_all(events) {
            Ok(records) => {
                *list = records;
                stats.text += local.text;
                stats.choices += local.choices;
                stats.active_messages += local.active_messages;
                stats.scripts_recompiled += 1;
            }
            Err(err) => warn!(file, error = %err, "keeping original script after compile failure"),
        }
    }
}

fn substitute(event: &mut SemanticEvent, mapping: &FlatMapping, stats: &mut ApplyStats) {
    match event {
        SemanticEvent::Text(block) => {
            if let Some(ContainerValue::Text(body)) = mapping.get_text(&block.body) {
                block.body = body.clone();
                stats.text += 1;
                return;
            }
            let Some(speaker) = block.speaker.as_deref() else {
                stats.unmatched += 1;
                return;
            };
            match mapping.get(&ContainerValue::pair(speaker, &block.body)) {
                Some(ContainerValue::List(pair)) if pair.len() == 2 => {
                    block.speaker = Some(pair[0].clone());
                    block.body = pair[1].clone();
                    stats.text += 1;
                }
                Some(other) => {
                    warn!(value = ?other, "speaker translation is not a name/text pair");
                    stats.unmatched += 1;
                }
                None => stats.unmatched += 1,
            }
        }
        SemanticEvent::Choice(choice) => {
            match mapping.get(&ContainerValue::List(choice.choices())) {
                Some(ContainerValue::List(translated)) => {
                    choice.set_choices(translated);
                    stats.choices += 1;
                }
                _ => stats.unmatched += 1,
            }
        }
        SemanticEvent::ActiveMessage(msg) => {
            let hit = msg.text().and_then(|t| mapping.get_text(&t).cloned());
            match hit {
                Some(ContainerValue::Text(translated)) => {
                    msg.set_text(&translated);
                    stats.active_messages += 1;
                }
                _ => stats.unmatched += 1,
            }
        }
        SemanticEvent::Raw(_) => {}
    }
}

fn apply_items(
    records: &mut [Option<ItemRecord>],
    container: &TranslationContainer,
    stats: &mut ApplyStats,
) {
    for (index, slot) in records.iter_mut().enumerate() {
        let Some(item) = slot else { continue };
        if !item.has_text() {
            continue;
        }
        let key = item_key(index);
        let Some(tl) = container.translated_value(&key) else {
            debug!(key = %key, "no translation for item");
            continue;
        };
        if apply_item(item, tl, &key) {
            stats.items += 1;
        }
    }
}

/// Reassigns item fields from a translated value, selected by its arity.
///
/// Two elements map to name plus description-or-note: the second element goes to the
/// description when there is one, and to the note unless both description and note are set
/// (in which case the note is left alone with a warning). Three elements map to name,
/// description and note. Anything else is left untouched.
pub fn apply_item(item: &mut ItemRecord, tl: &ContainerValue, key: &str) -> bool {
    let parts = match tl {
        ContainerValue::List(parts) => parts.as_slice(),
        ContainerValue::Text(_) => {
            warn!(key, value = ?tl, "item translation has invalid arity");
            return false;
        }
    };
    match parts {
        [name, second] => {
            if !item.name.is_empty() {
                item.name = name.clone();
            }
            let has_description = !item.description().is_empty();
            if has_description {
                item.description = Some(second.clone());
            }
            if !item.note.is_empty() && has_description {
                warn!(key, "item has both a description and a note; note left untranslated");
            } else {
                item.note = second.clone();
            }
            true
        }
        [name, description, note] => {
            item.name = name.clone();
            item.description = Some(description.clone());
            item.note = note.clone();
            true
        }
        _ => {
            warn!(key, arity = parts.len(), "item translation has invalid arity");
            false
        }
    }
}
