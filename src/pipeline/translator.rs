use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::ir::{FlatMapping, TranslationContainer};
use crate::models::CompletionClient;
use crate::progress::ContainerProgress;
use crate::quality::BracketTolerance;
use crate::rpgm::{prepare_containers, GameDocument, ReapplyEngine, ScriptTransformer};

use super::prompts::{wrap_json, History, PromptBuilder};
use super::retry::ValidatingRetrier;
use super::PipelineConfig;

/// Drives containers through prompt construction and the retrier. Chunks inside one container
/// run strictly in order; containers run side by side, at most `workers` at a time.
pub struct TranslationOrchestrator {
    builder: PromptBuilder,
    retrier: ValidatingRetrier,
    workers: usize,
}

impl TranslationOrchestrator {
    pub fn new(builder: PromptBuilder, retrier: ValidatingRetrier, workers: usize) -> Self {
        Self {
            builder,
            retrier,
            workers: workers.max(1),
        }
    }

    /// Translates one container chunk by chunk. A chunk that exhausts its attempts abandons
    /// the rest of the container; what was accepted before that is kept.
    pub async fn translate_container(
        &self,
        mut container: TranslationContainer,
        label: &str,
    ) -> TranslationContainer {
        let system = match self.builder.system_prompt(container.kind) {
            Ok(system) => system,
            Err(err) => {
                warn!(container = label, error = %err, "cannot build system prompt; container skipped");
                return container;
            }
        };
        let prefix = self.builder.assistant_prefix();
        let mut history = History::new(self.builder.settings().history);
        let mut tolerance = BracketTolerance::default();

        let entries = container.source.clone();
        let chunk_count = entries.len().div_ceil(self.builder.batch_size());
        for (idx, chunk) in self.builder.chunks(&entries).enumerate() {
            let user = wrap_json(chunk.iter().map(|(k, v)| (k.as_str(), v)));
            let prompt = self.builder.render(&system, &history, &user);
            debug!(container = label, chunk = idx, keys = chunk.len(), "requesting chunk");
            let span = info_span!("container", container = label, chunk = idx);
            match self
                .retrier
                .translate_chunk(&prompt, &prefix, chunk, &mut tolerance)
                .instrument(span)
                .await
            {
                Ok(accepted) => {
                    let assistant = wrap_json(accepted.iter().map(|(k, v)| (k.as_str(), v)));
                    container.merge_translated(accepted);
                    history.push_exchange(user, assistant);
                }
                Err(gave_up) => {
                    let first_key = chunk.first().map(|(k, _)| k.as_str()).unwrap_or_default();
                    warn!(
                        container = label,
                        chunk = idx,
                        of = chunk_count,
                        first_key,
                        error = %gave_up,
                        "giving up on container; remaining chunks abandoned"
                    );
                    break;
                }
            }
        }
        container
    }

    /// Translates every present container. Output keeps the input's positions.
    pub async fn translate_all(
        &self,
        containers: Vec<Option<TranslationContainer>>,
        file: &str,
    ) -> Vec<Option<TranslationContainer>> {
        let mut slots = containers;
        let work: Vec<(usize, TranslationContainer)> = slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.take().map(|c| (idx, c)))
            .collect();
        let mut progress = ContainerProgress::new(file, work.len());

        let mut results = futures::stream::iter(work)
            .map(|(idx, container)| async move {
                let label = format!("{file}#{idx}");
                (idx, self.translate_container(container, &label).await)
            })
            .buffer_unordered(self.workers);
        while let Some((idx, container)) = results.next().await {
            slots[idx] = Some(container);
            progress.tick();
        }
        progress.finish();
        slots
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub patched: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileOutcome {
    Patched,
    Skipped,
}

pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    transformer: ScriptTransformer,
    orchestrator: TranslationOrchestrator,
}

impl TranslatorPipeline {
    pub fn new(cfg: PipelineConfig) -> anyhow::Result<Self> {
        let client = cfg.completion_client()?;
        Self::with_client(cfg, client)
    }

    pub fn with_client(cfg: PipelineConfig, client: Arc<dyn CompletionClient>) -> anyhow::Result<Self> {
        let builder = cfg.prompt_builder()?;
        let retrier = ValidatingRetrier::new(client, cfg.model.clone(), cfg.params.clone());
        let orchestrator = TranslationOrchestrator::new(builder, retrier, cfg.container_workers);
        Ok(Self {
            transformer: ScriptTransformer::new(cfg.predict_speakers),
            orchestrator,
            cfg,
        })
    }

    /// Translates every `*.json` file in the input folder, at most `concurrency` at a time.
    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        let files = list_json_files(&self.cfg.inputs)?;
        if files.is_empty() {
            warn!(inputs = %self.cfg.inputs.display(), "no json files to translate");
            return Ok(RunSummary::default());
        }
        tokio::fs::create_dir_all(&self.cfg.outputs)
            .await
            .with_context(|| format!("create output dir: {}", self.cfg.outputs.display()))?;
        info!(files = files.len(), "translating");

        let limiter = Semaphore::new(self.cfg.concurrency.max(1));
        let jobs = files.iter().map(|path| {
            let limiter = &limiter;
            async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|_| anyhow!("file limiter closed"))?;
                self.process_file(path).await
            }
        });
        let outcomes = futures::future::join_all(jobs).await;

        let mut summary = RunSummary::default();
        for (path, outcome) in files.iter().zip(outcomes) {
            match outcome {
                Ok(FileOutcome::Patched) => summary.patched += 1,
                Ok(FileOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    error!(file = %path.display(), error = %format!("{err:#}"), "file failed");
                    summary.failed += 1;
                }
            }
        }
        info!(
            patched = summary.patched,
            skipped = summary.skipped,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }

    async fn process_file(&self, path: &Path) -> anyhow::Result<FileOutcome> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read input: {}", path.display()))?;
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(err) => {
                warn!(file = %name, error = %err, "malformed json; skipping");
                return Ok(FileOutcome::Skipped);
            }
        };
        let mut doc = match GameDocument::from_value(value) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(file = %name, error = %err, "unsupported document; skipping");
                return Ok(FileOutcome::Skipped);
            }
        };

        let containers = prepare_containers(&self.transformer, &doc, &name);
        let present = containers.iter().flatten().count();
        if present == 0 {
            info!(file = %name, kind = %doc.label(), "nothing to translate");
            return Ok(FileOutcome::Skipped);
        }
        info!(file = %name, kind = %doc.label(), containers = present, "translating containers");

        let translated = self.orchestrator.translate_all(containers, &name).await;
        ReapplyEngine::new(self.transformer).apply(&mut doc, &translated, &name);

        let patched = doc.to_value().context("serialize patched document")?;
        let output = self.cfg.outputs.join(&name);
        write_pretty_json(&output, &patched).await?;

        let dump = FlatMapping::build(translated.iter().map(Option::as_ref)).to_dump();
        let dump_path = self.cfg.outputs.join(dump_file_name(path));
        write_pretty_json(&dump_path, &dump).await?;

        if self.cfg.delete_inputs {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("delete input: {}", path.display()))?;
        }
        info!(file = %name, output = %output.display(), "patched");
        Ok(FileOutcome::Patched)
    }
}

fn list_json_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("read input dir: {}", dir.display()))?;
    for entry in entries {
        let path = entry.context("read input dir entry")?.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if path.is_file() && is_json {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn dump_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}_dump.json")
}

async fn write_pretty_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize json")?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("write {}", path.display()))
}

/// Converts every `*_dump.json` under `dir` into a tab-separated `*_dump_csv.csv` with one
/// `original<TAB>translation` row per entry. Returns the number of files written.
pub fn dump2csv(dir: &Path) -> anyhow::Result<usize> {
    let mut written = 0;
    for path in list_json_files(dir)? {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if !stem.ends_with("_dump") {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read dump: {}", path.display()))?;
        let dump: serde_json::Map<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("parse dump: {}", path.display()))?;

        let csv_path = dir.join(format!("{stem}_csv.csv"));
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::CRLF)
            .from_path(&csv_path)
            .with_context(|| format!("create {}", csv_path.display()))?;
        for (original, translated) in &dump {
            let translated = match translated {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writer
                .write_record([original.as_str(), translated.as_str()])
                .with_context(|| format!("write {}", csv_path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("write {}", csv_path.display()))?;
        info!(csv = %csv_path.display(), rows = dump.len(), "wrote dump table");
        written += 1;
    }
    Ok(written)
}
