mod config;
pub mod prompts;
pub mod retry;
mod translator;

pub use config::{init_default_config, PipelineConfig, CONFIG_ENV};
pub use translator::{dump2csv, RunSummary, TranslationOrchestrator, TranslatorPipeline};
