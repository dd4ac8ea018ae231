use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Map, Value};

use crate::config::{
    find_default_config, load_config, load_knowledge_db, load_samples, AppConfig,
    DEFAULT_CONFIG_FILE,
};
use crate::models::{CompletionClient, OpenAiCompletionClient};
use crate::pipeline::prompts::{
    template_by_name, PromptBuilder, PromptSettings, DEFAULT_EVENT_MODE, DEFAULT_ITEM_MODE,
    DEFAULT_KNOWLEDGE_DB, DEFAULT_KNOWLEDGE_DB_TEXT, DEFAULT_SAMPLES, DEFAULT_SAMPLES_TEXT,
    DEFAULT_SYSTEM_PROMPT,
};

pub const CONFIG_ENV: &str = "RPGM_TRANSLATOR_CONFIG";

/// Fully resolved run settings: file config merged with defaults, paths made absolute.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub inputs: PathBuf,
    pub outputs: PathBuf,
    pub delete_inputs: bool,

    pub predict_speakers: bool,

    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub params: Map<String, Value>,
    pub concurrency: usize,
    pub container_workers: usize,
    pub timeout: Option<Duration>,

    pub template: String,
    pub prompts: PromptSettings,
}

impl PipelineConfig {
    pub fn from_paths_and_args(
        config_path: Option<PathBuf>,
        inputs: Option<PathBuf>,
        outputs: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, DEFAULT_CONFIG_FILE));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_FILE));
        let config_dir = cfg_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.clone());
        let relative_to_config = |p: PathBuf| {
            if p.is_relative() {
                config_dir.join(p)
            } else {
                p
            }
        };

        let inputs = inputs
            .or_else(|| file_cfg.paths.inputs.clone().map(relative_to_config))
            .unwrap_or_else(|| config_dir.join("inputs"));
        let outputs = outputs
            .or_else(|| file_cfg.paths.outputs.clone().map(relative_to_config))
            .unwrap_or_else(|| config_dir.join("outputs"));
        let delete_inputs = file_cfg.paths.delete_inputs.unwrap_or(true);
        let predict_speakers = file_cfg.engine.rpgmaker.speaker_check_for_mv.unwrap_or(true);

        let api = &file_cfg.api;
        let host = api
            .host
            .clone()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:5000/v1".to_string());
        let api_key = api.key.clone().filter(|k| !k.trim().is_empty());
        let model = api.model.clone().unwrap_or_else(|| "local".to_string());
        let concurrency = api.concurrency.unwrap_or(2).max(1);
        let container_workers = api.container_workers.unwrap_or(5).max(1);
        let timeout = match api.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(600)),
        };

        let p = &file_cfg.prompts;
        let template = p.template.clone().unwrap_or_else(|| "chatml".to_string());
        let mut modes: BTreeMap<String, String> = p.modes.clone();
        modes
            .entry("event".to_string())
            .or_insert_with(|| DEFAULT_EVENT_MODE.to_string());
        modes
            .entry("item".to_string())
            .or_insert_with(|| DEFAULT_ITEM_MODE.to_string());

        let db_path = optional_file(&config_dir, p.knowledge_db.as_deref(), DEFAULT_KNOWLEDGE_DB);
        let db = match db_path {
            Some(path) => load_knowledge_db(&path)?,
            None => Vec::new(),
        };
        let samples_path = optional_file(&config_dir, p.samples.as_deref(), DEFAULT_SAMPLES);
        let (sample_in, sample_out) = match samples_path {
            Some(path) => load_samples(&path)?,
            None => (Value::Object(Map::new()), Value::Object(Map::new())),
        };

        let prompts = PromptSettings {
            system: p
                .system
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            batch: p.batch.unwrap_or(10).max(1),
            history: p.history.unwrap_or(3),
            source_lang: p
                .source_lang
                .clone()
                .unwrap_or_else(|| "Japanese".to_string()),
            dest_lang: p.dest_lang.clone().unwrap_or_else(|| "English".to_string()),
            modes,
            db,
            sample_in,
            sample_out,
        };

        Ok(Self {
            workdir,
            config_path: cfg_path,
            inputs,
            outputs,
            delete_inputs,
            predict_speakers,
            host,
            api_key,
            model,
            params: api.params.clone(),
            concurrency,
            container_workers,
            timeout,
            template,
            prompts,
        })
    }

    pub fn prompt_builder(&self) -> anyhow::Result<PromptBuilder> {
        let template = template_by_name(&self.template)?;
        Ok(PromptBuilder::new(self.prompts.clone(), template))
    }

    pub fn completion_client(&self) -> anyhow::Result<Arc<dyn CompletionClient>> {
        let client = OpenAiCompletionClient::new(self.host.clone(), self.api_key.clone(), self.timeout)
            .context("build completion client")?;
        Ok(Arc::new(client))
    }
}

/// A configured path (relative to the config dir, must exist), or the default file name when
/// it happens to sit next to the config.
fn optional_file(config_dir: &Path, configured: Option<&str>, default_name: &str) -> Option<PathBuf> {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(rel) => {
            let p = PathBuf::from(rel);
            Some(if p.is_relative() { config_dir.join(p) } else { p })
        }
        None => Some(config_dir.join(default_name)).filter(|p| p.exists()),
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILE);

    for (fname, body) in [
        (DEFAULT_KNOWLEDGE_DB, DEFAULT_KNOWLEDGE_DB_TEXT),
        (DEFAULT_SAMPLES, DEFAULT_SAMPLES_TEXT),
    ] {
        let p = dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[prompts]
# Chat template used to render the conversation: "chatml", "alpaca" or "llama3".
template = "chatml"
# Entries per request and exchanges kept as context.
batch = 10
history = 3
source_lang = "Japanese"
dest_lang = "English"
knowledge_db = "knowledge_db.toml"
samples = "sample.json"
# system = """..."""  (placeholders: {{db_data}} {{source_lang}} {{dest_lang}} {{mode}} {{sample_in}} {{sample_out}})

[prompts.modes]
event = "The values are lines of in-game dialogue, choices and popup messages. A two-element list is [speaker name, dialogue]."
item = "The values are [name, description, note] triples for items, skills, weapons and armor. Leave an empty string empty."

[api]
host = "http://127.0.0.1:5000/v1"
key = ""
model = "local"
# Files in flight / containers in flight per file.
concurrency = 2
container_workers = 5
timeout_secs = 600

[api.params]
temperature = 0.3
max_tokens = 2048

[engine.rpgmaker]
speaker_check_for_mv = true

[paths]
inputs = "inputs"
outputs = "outputs"
delete_inputs = true
"#;
