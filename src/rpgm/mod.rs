//! RPG Maker MV/MZ data files: event command lists, their semantic view, and the
//! extraction/reapplication passes that move text in and out of translation containers.

pub mod apply;
pub mod event;
pub mod extract;
pub mod interpreter;
pub mod models;
pub mod semantic;

pub use apply::{ApplyStats, ReapplyEngine};
pub use event::{EventRecord, ScriptError};
pub use extract::prepare_containers;
pub use interpreter::ScriptTransformer;
pub use models::{DocumentError, GameDocument, RecordKind};
pub use semantic::SemanticEvent;
