use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_CONFIG_FILE: &str = "rpgm-translator.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub paths: PathsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    /// System prompt template. Placeholders: `{{db_data}}`, `{{source_lang}}`,
    /// `{{dest_lang}}`, `{{mode}}`, `{{sample_in}}`, `{{sample_out}}`.
    #[serde(default)]
    pub system: Option<String>,
    /// Chat template name: "chatml", "alpaca" or "llama3".
    #[serde(default)]
    pub template: Option<String>,
    /// Entries per request.
    #[serde(default)]
    pub batch: Option<usize>,
    /// Exchanges kept as conversational context.
    #[serde(default)]
    pub history: Option<usize>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub dest_lang: Option<String>,
    /// TOML file with a `[db]` table of fixed term translations. Relative to the config file.
    #[serde(default)]
    pub knowledge_db: Option<String>,
    /// JSON file holding `[sample_in, sample_out]`. Relative to the config file.
    #[serde(default)]
    pub samples: Option<String>,
    /// Per-container-kind instructions, keyed by "event" / "item".
    #[serde(default)]
    pub modes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ApiSection {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Files translated at the same time.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Containers translated at the same time within one file.
    #[serde(default)]
    pub container_workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra request body fields (temperature, top_p, ...), passed through verbatim.
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineSection {
    #[serde(default)]
    pub rpgmaker: RpgMakerSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RpgMakerSection {
    /// Guess MV-style speaker labels from the first dialogue line.
    #[serde(default)]
    pub speaker_check_for_mv: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PathsSection {
    #[serde(default)]
    pub inputs: Option<PathBuf>,
    #[serde(default)]
    pub outputs: Option<PathBuf>,
    #[serde(default)]
    pub delete_inputs: Option<bool>,
}

/// Knowledge base file: a `[db]` table, order preserved.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct KnowledgeDb {
    #[serde(default)]
    pub db: toml::Table,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

pub fn load_knowledge_db(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read knowledge db: {}", path.display()))?;
    let parsed: KnowledgeDb = toml::from_str(&text)
        .with_context(|| format!("parse knowledge db: {}", path.display()))?;
    Ok(parsed
        .db
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Worked example pair shown to the model: `[sample_in, sample_out]`.
pub fn load_samples(path: &Path) -> anyhow::Result<(Value, Value)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read samples: {}", path.display()))?;
    let (sample_in, sample_out): (Value, Value) = serde_json::from_str(&text)
        .with_context(|| format!("parse samples (expected [in, out]): {}", path.display()))?;
    Ok((sample_in, sample_out))
}
