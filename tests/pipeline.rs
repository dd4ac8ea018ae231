use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use rpgm_translator::ir::{ContainerKind, ContainerValue, TranslationContainer};
use rpgm_translator::models::{CompletionClient, CompletionError, CompletionRequest, CompletionStream};
use rpgm_translator::pipeline::prompts::{
    template_by_name, PromptBuilder, PromptSettings, DEFAULT_EVENT_MODE, DEFAULT_ITEM_MODE,
    DEFAULT_SYSTEM_PROMPT,
};
use rpgm_translator::pipeline::retry::ValidatingRetrier;
use rpgm_translator::pipeline::{
    dump2csv, PipelineConfig, TranslationOrchestrator, TranslatorPipeline,
};

/// Translates the last fenced request in the prompt word for word from a fixed glossary.
/// Knobs: a key whose requests get an unfenced reply, a key whose requests are slow, a delay on
/// every call, and dropping 「」 from every translation. Tracks how many calls overlap.
#[derive(Default)]
struct Glossary {
    poison: Option<&'static str>,
    slow_key: Option<&'static str>,
    delay: Option<Duration>,
    strip_brackets: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Glossary {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn poisoned(key: &'static str) -> Arc<Self> {
        Arc::new(Self {
            poison: Some(key),
            ..Self::default()
        })
    }

    fn slow_on(key: &'static str) -> Arc<Self> {
        Arc::new(Self {
            slow_key: Some(key),
            ..Self::default()
        })
    }

    fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn bracketless() -> Arc<Self> {
        Arc::new(Self {
            strip_brackets: true,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply(&self, asked: &Map<String, Value>) -> String {
        if self.poison.is_some_and(|k| asked.contains_key(k)) {
            return "I cannot do that.".to_string();
        }
        let answer: Map<String, Value> = asked
            .iter()
            .map(|(k, v)| {
                let mut tl = translate(v);
                if self.strip_brackets {
                    if let Value::String(s) = &tl {
                        tl = Value::from(s.replace(['「', '」'], ""));
                    }
                }
                (k.clone(), tl)
            })
            .collect();
        format!("\n{}\n```", Value::Object(answer))
    }
}

fn word(s: &str) -> String {
    match s {
        "" => String::new(),
        "アリス" => "Alice".into(),
        "「こんにちは」" => "「Hello」".into(),
        "はい" => "Yes".into(),
        "いいえ" => "No".into(),
        "ようこそ" => "Welcome".into(),
        "ポーション" => "Potion".into(),
        "体力を回復する" => "Restores HP".into(),
        "一" => "One".into(),
        "二" => "Two".into(),
        "三" => "Three".into(),
        _ => "???".into(),
    }
}

fn last_request(prompt: &str) -> Map<String, Value> {
    let head = prompt.rsplit_once("Translated ").map_or(prompt, |(h, _)| h);
    let start = head.rfind("```json").expect("user fence") + "```json".len();
    let rest = &head[start..];
    let end = rest.find("```").expect("closing fence");
    serde_json::from_str(&rest[..end]).expect("request json")
}

fn translate(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::from(word(s)),
        Value::Array(items) => Value::Array(items.iter().map(translate).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl CompletionClient for Glossary {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let asked = last_request(&request.prompt);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.slow_key.is_some_and(|k| asked.contains_key(k)) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let reply = self.reply(&asked);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        // Split the reply to exercise fragment concatenation.
        let mid = reply.char_indices().nth(reply.chars().count() / 2).map_or(0, |(i, _)| i);
        let parts = vec![Ok(reply[..mid].to_string()), Ok(reply[mid..].to_string())];
        Ok(futures::stream::iter(parts).boxed())
    }
}

fn settings(batch: usize) -> PromptSettings {
    let mut modes = BTreeMap::new();
    modes.insert("event".to_string(), DEFAULT_EVENT_MODE.to_string());
    modes.insert("item".to_string(), DEFAULT_ITEM_MODE.to_string());
    PromptSettings {
        system: DEFAULT_SYSTEM_PROMPT.to_string(),
        batch,
        history: 2,
        source_lang: "Japanese".into(),
        dest_lang: "English".into(),
        modes,
        db: vec![("アリス".into(), "Alice".into())],
        sample_in: json!({}),
        sample_out: json!({}),
    }
}

fn orchestrator(client: Arc<Glossary>, batch: usize, attempts: usize, workers: usize) -> TranslationOrchestrator {
    let builder = PromptBuilder::new(settings(batch), template_by_name("chatml").expect("template"));
    let retrier = ValidatingRetrier::new(client, "test", Map::new()).with_max_attempts(attempts);
    TranslationOrchestrator::new(builder, retrier, workers)
}

fn container(entries: &[(&str, &str)]) -> TranslationContainer {
    let mut c = TranslationContainer::new(ContainerKind::Event);
    for (k, v) in entries {
        c.push(*k, ContainerValue::Text((*v).to_string()));
    }
    c
}

#[tokio::test]
async fn container_is_translated_chunk_by_chunk() {
    let client = Glossary::new();
    let orch = orchestrator(client.clone(), 2, 3, 2);
    let out = orch
        .translate_container(container(&[("L_00", "一"), ("L_01", "二"), ("L_02", "三")]), "t")
        .await;
    assert!(out.missing_keys().is_empty());
    assert_eq!(out.translated_value("L_02"), Some(&ContainerValue::Text("Three".into())));
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn give_up_keeps_earlier_chunks_and_skips_the_rest() {
    let client = Glossary::poisoned("L_01");
    let orch = orchestrator(client.clone(), 1, 2, 1);
    let out = orch
        .translate_container(container(&[("L_00", "一"), ("L_01", "二"), ("L_02", "三")]), "t")
        .await;
    assert_eq!(out.translated_value("L_00"), Some(&ContainerValue::Text("One".into())));
    assert_eq!(out.missing_keys(), vec!["L_01", "L_02"]);
    // One call for L_00, two failed attempts for L_01, none for L_02.
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn translate_all_keeps_positions() {
    let client = Glossary::slow_on("L_00");
    let orch = orchestrator(client, 10, 2, 3);
    let slots = vec![
        Some(container(&[("L_00", "一")])),
        None,
        Some(container(&[("L_05", "二")])),
        Some(container(&[("L_07", "三")])),
    ];
    let out = orch.translate_all(slots, "Map001.json").await;
    assert_eq!(out.len(), 4);
    assert!(out[1].is_none());
    let text = |i: usize, k: &str| out[i].as_ref().and_then(|c| c.translated_value(k)).cloned();
    assert_eq!(text(0, "L_00"), Some(ContainerValue::Text("One".into())));
    assert_eq!(text(2, "L_05"), Some(ContainerValue::Text("Two".into())));
    assert_eq!(text(3, "L_07"), Some(ContainerValue::Text("Three".into())));
}

#[tokio::test]
async fn translate_all_runs_at_most_workers_containers_at_once() {
    let client = Glossary::delayed(Duration::from_millis(30));
    let orch = orchestrator(client.clone(), 10, 2, 2);
    let slots: Vec<_> = (0..8).map(|_| Some(container(&[("L_00", "一")]))).collect();
    let out = orch.translate_all(slots, "Map002.json").await;
    assert!(out.iter().flatten().all(|c| c.missing_keys().is_empty()));
    assert_eq!(client.calls(), 8);
    assert_eq!(client.peak(), 2);
}

#[tokio::test]
async fn bracket_leniency_carries_across_chunks_of_one_container() {
    let client = Glossary::bracketless();
    let orch = orchestrator(client.clone(), 1, 10, 1);

    // The same key in two chunks: three rejections on the first, none on the second.
    let mut repeated = TranslationContainer::new(ContainerKind::Event);
    repeated.push("L_00", ContainerValue::Text("「こんにちは」".into()));
    repeated.push("L_00", ContainerValue::Text("「こんにちは」".into()));
    let out = orch.translate_container(repeated, "a").await;
    assert_eq!(out.translated_value("L_00"), Some(&ContainerValue::Text("Hello".into())));
    assert_eq!(client.calls(), 4 + 1);

    // A new container starts from a clean count.
    let fresh = container(&[("L_00", "「こんにちは」")]);
    let out = orch.translate_container(fresh, "b").await;
    assert!(out.missing_keys().is_empty());
    assert_eq!(client.calls(), 5 + 4);
}

fn rec(code: i64, params: Value) -> Value {
    json!({"code": code, "indent": 0, "parameters": params})
}

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string(value).expect("serialize")).expect("write");
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("read")).expect("json")
}

#[tokio::test]
async fn run_patches_every_supported_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).expect("mkdir");
    std::fs::write(
        dir.path().join("rpgm-translator.toml"),
        "[prompts]\nbatch = 5\n[api]\nconcurrency = 2\ncontainer_workers = 2\n",
    )
    .expect("config");

    let map = json!({
        "autoplayBgm": false,
        "displayName": "Town",
        "events": [null, {
            "id": 1,
            "name": "EV001",
            "pages": [{
                "list": [
                    rec(101, json!(["", 0, 0, 2])),
                    rec(401, json!(["アリス"])),
                    rec(401, json!(["「こんにちは」"])),
                    rec(102, json!([["はい", "いいえ"], 1, 0, 2, 0])),
                    rec(0, json!([])),
                ],
                "trigger": 0
            }]
        }]
    });
    let commons = json!([null, {
        "id": 1,
        "name": "Intro",
        "switchId": 1,
        "trigger": 0,
        "list": [rec(101, json!(["", 0, 0, 2])), rec(401, json!(["ようこそ"])), rec(0, json!([]))]
    }]);
    let items = json!([null, {
        "id": 1,
        "name": "ポーション",
        "description": "体力を回復する",
        "note": "",
        "consumable": true,
        "price": 50
    }]);
    write_json(&inputs.join("Map001.json"), &map);
    write_json(&inputs.join("CommonEvents.json"), &commons);
    write_json(&inputs.join("Items.json"), &items);
    std::fs::write(inputs.join("Broken.json"), "{not json").expect("write");

    let cfg = PipelineConfig::from_paths_and_args(Some(dir.path().join("rpgm-translator.toml")), None, None)
        .expect("config");
    let outputs = cfg.outputs.clone();
    let pipeline = TranslatorPipeline::with_client(cfg, Glossary::new()).expect("pipeline");
    let summary = pipeline.run().await.expect("run");
    assert_eq!(summary.patched, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);

    let patched_map = read_json(&outputs.join("Map001.json"));
    let list = &patched_map["events"][1]["pages"][0]["list"];
    assert_eq!(list[0]["code"], json!(101));
    assert_eq!(list[1]["parameters"][0], json!("Alice"));
    assert_eq!(list[2]["parameters"][0], json!("「Hello」"));
    assert_eq!(list[3]["parameters"][0], json!(["Yes", "No"]));
    assert_eq!(patched_map["displayName"], json!("Town"));

    let patched_commons = read_json(&outputs.join("CommonEvents.json"));
    assert_eq!(patched_commons[1]["list"][1]["parameters"][0], json!("Welcome"));

    let patched_items = read_json(&outputs.join("Items.json"));
    assert_eq!(patched_items[1]["name"], json!("Potion"));
    assert_eq!(patched_items[1]["description"], json!("Restores HP"));
    assert_eq!(patched_items[1]["price"], json!(50));

    let dump = read_json(&outputs.join("Map001_dump.json"));
    assert_eq!(dump["[\"はい\",\"いいえ\"]"], json!(["Yes", "No"]));

    // Patched inputs are consumed; the broken one stays for inspection.
    assert!(!inputs.join("Map001.json").exists());
    assert!(!inputs.join("Items.json").exists());
    assert!(inputs.join("Broken.json").exists());
    assert!(!outputs.join("Broken.json").exists());

    assert_eq!(dump2csv(&outputs).expect("csv"), 3);
    let csv = std::fs::read_to_string(outputs.join("Items_dump_csv.csv")).expect("csv");
    assert!(csv.contains("Potion"));
}

#[tokio::test]
async fn run_translates_at_most_concurrency_files_at_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).expect("mkdir");
    std::fs::write(
        dir.path().join("rpgm-translator.toml"),
        "[api]\nconcurrency = 2\ncontainer_workers = 1\n[paths]\ndelete_inputs = false\n",
    )
    .expect("config");
    for n in 0..5 {
        let commons = json!([null, {
            "id": 1,
            "name": "Intro",
            "switchId": 1,
            "trigger": 0,
            "list": [rec(101, json!(["", 0, 0, 2])), rec(401, json!(["ようこそ"])), rec(0, json!([]))]
        }]);
        write_json(&inputs.join(format!("CommonEvents{n}.json")), &commons);
    }

    let cfg = PipelineConfig::from_paths_and_args(Some(dir.path().join("rpgm-translator.toml")), None, None)
        .expect("config");
    let client = Glossary::delayed(Duration::from_millis(30));
    let pipeline = TranslatorPipeline::with_client(cfg, client.clone()).expect("pipeline");
    let summary = pipeline.run().await.expect("run");
    assert_eq!(summary.patched, 5);
    assert_eq!(client.calls(), 5);
    assert_eq!(client.peak(), 2);
    assert!(inputs.join("CommonEvents0.json").exists());
}
