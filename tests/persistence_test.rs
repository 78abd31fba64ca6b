//! Tests for result persistence through sinks.

use async_trait::async_trait;
use serde_json::{json, Value};
use stagecraft::{
    handler_fn, AuditAction, AuditEmitter, AuditEvent, Config, JsonFileSink, MemoryAuditLog,
    Pipeline, PipelineError, PipelineResult, ResultSink, RunMode, StageError,
};
use std::sync::{Arc, Mutex};

/// Sink that remembers every save.
#[derive(Default)]
struct CollectingSink {
    saved: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl ResultSink<Value> for CollectingSink {
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<Value>) -> anyhow::Result<String> {
        let doc = serde_json::to_value(result)?;
        self.saved
            .lock()
            .unwrap()
            .push((pipeline_name.to_string(), doc));
        Ok(format!("memory://{}", pipeline_name))
    }
}

struct FailingSink;

#[async_trait]
impl ResultSink<Value> for FailingSink {
    async fn save(&self, _pipeline_name: &str, _result: &PipelineResult<Value>) -> anyhow::Result<String> {
        anyhow::bail!("disk full")
    }
}

/// Sink and emitter writing into one shared timeline.
#[derive(Clone, Default)]
struct Timeline {
    events: Arc<Mutex<Vec<String>>>,
}

impl Timeline {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink<Value> for Timeline {
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<Value>) -> anyhow::Result<String> {
        self.push(format!("save:{}", result.status));
        Ok(pipeline_name.to_string())
    }
}

#[async_trait]
impl AuditEmitter for Timeline {
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.push(format!("{}:{}", event.action, event.object_id));
        Ok(())
    }
}

fn tag(key: &'static str) -> impl Fn(Value) -> Result<Value, StageError> + Send + Sync {
    move |mut data: Value| {
        data[key] = json!(true);
        Ok(data)
    }
}

#[tokio::test]
async fn test_sink_called_once_per_execute() {
    let sink = Arc::new(CollectingSink::default());
    let pipeline = Pipeline::<Value>::new("intake")
        .with_sink(sink.clone())
        .stage("s1", handler_fn(tag("s1")));

    let first = pipeline.execute(json!({ "run": 1 })).await.unwrap();
    let second = pipeline.execute(json!({ "run": 2 })).await.unwrap();

    // Independent results in memory
    assert_eq!(first.output["run"], 1);
    assert_eq!(second.output["run"], 2);

    let saved = sink.saved.lock().unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].0, "intake");
    assert_eq!(saved[0].1["output"]["run"], 1);
    assert_eq!(saved[1].1["output"]["run"], 2);
    // Saved after assembly: the document is complete
    assert_eq!(saved[1].1["metadata"]["successful_stages"], 1);
}

#[tokio::test]
async fn test_file_sink_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSink::new(dir.path().join("artifacts"));
    let path = sink.path_for("intake");

    let pipeline = Pipeline::<Value>::new("intake")
        .with_sink(sink)
        .stage("s1", handler_fn(tag("s1")));

    pipeline.execute(json!({ "run": 1 })).await.unwrap();
    pipeline.execute(json!({ "run": 2 })).await.unwrap();

    assert!(path.exists());
    let content = std::fs::read_to_string(&path).unwrap();
    let doc: Value = serde_json::from_str(&content).unwrap();
    assert_eq!(doc["pipeline"], "intake");
    assert_eq!(doc["output"], json!({ "run": 2, "s1": true }));
    assert_eq!(doc["stages"].as_array().unwrap().len(), 1);

    let files = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_file_sink_returns_location() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSink::new(dir.path());
    let pipeline: Pipeline<Value> = Pipeline::new("located");
    let result = pipeline.execute(json!(null)).await.unwrap();

    let location = sink.save("located", &result).await.unwrap();
    assert!(location.ends_with("located_result.json"));
}

#[tokio::test]
async fn test_sink_failure_propagates() {
    let pipeline = Pipeline::<Value>::new("broken_sink")
        .with_sink(FailingSink)
        .stage("s1", handler_fn(tag("s1")));

    let err = pipeline.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, PipelineError::Sink(_)));
    assert!(err.to_string().contains("disk full"));
}

#[tokio::test]
async fn test_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        mode: RunMode::DryRun,
        artifact_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    let pipeline = Pipeline::<Value>::from_config("configured", &config).stage("s1", handler_fn(tag("s1")));
    let result = pipeline.execute(json!({})).await.unwrap();

    assert_eq!(result.mode, "DRY_RUN");
    assert!(dir.path().join("configured_result.json").exists());
}

#[tokio::test]
async fn test_save_precedes_complete_event() {
    let timeline = Timeline::default();
    let pipeline = Pipeline::<Value>::new("ordered")
        .with_audit(timeline.clone())
        .with_sink(timeline.clone())
        .stage("s1", handler_fn(tag("s1")))
        .optional_stage("s2", handler_fn(|_: Value| Err(StageError::msg("skip me"))));

    pipeline.execute(json!({})).await.unwrap();

    assert_eq!(
        timeline.events(),
        vec![
            "pipeline_start:ordered",
            "stage_execute:s1",
            "stage_execute:s2",
            "save:partial",
            "pipeline_complete:ordered",
        ]
    );
}

#[tokio::test]
async fn test_sink_failure_skips_complete_event() {
    let log = Arc::new(MemoryAuditLog::new("TEST"));
    let pipeline = Pipeline::<Value>::new("broken_sink")
        .with_audit(log.clone())
        .with_sink(FailingSink)
        .stage("s1", handler_fn(tag("s1")));

    let err = pipeline.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, PipelineError::Sink(_)));

    let entries = log.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event.action, AuditAction::PipelineStart);
    assert_eq!(entries[1].event.action, AuditAction::StageExecute);
    assert!(entries
        .iter()
        .all(|e| e.event.action != AuditAction::PipelineComplete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_sink_overlapping_runs_keep_whole_document() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSink::new(dir.path());
    let path = sink.path_for("shared");

    // Output size follows the input so the two runs write very different documents
    let pipeline = Arc::new(Pipeline::<Value>::new("shared").with_sink(sink).stage(
        "pad",
        handler_fn(|data: Value| {
            let size = data["size"].as_u64().unwrap_or(0) as usize;
            Ok(json!({ "size": size, "padding": "x".repeat(size) }))
        }),
    ));

    for _ in 0..50 {
        let large = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute(json!({ "size": 20_000 })).await })
        };
        let small = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute(json!({ "size": 3 })).await })
        };
        let large = large.await.unwrap().unwrap();
        let small = small.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let doc: Value = serde_json::from_str(&content).expect("result file holds one whole document");
        assert!(
            doc["output"] == large.output || doc["output"] == small.output,
            "stored output matches neither run"
        );
    }

    // Temp files never outlive a save
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_audit_log_saved_in_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        mode: RunMode::Live,
        artifact_dir: dir.path().join("artifacts"),
        audit_dir: dir.path().join("audit"),
        ..Config::default()
    };

    let log = Arc::new(MemoryAuditLog::new(config.mode.as_str()));
    let pipeline = Pipeline::<Value>::from_config("configured", &config)
        .with_audit(log.clone())
        .stage("s1", handler_fn(tag("s1")));
    pipeline.execute(json!({})).await.unwrap();

    let path = log.save_in(&config.audit_dir).await.unwrap();
    assert_eq!(path, config.audit_dir.join("audit.jsonl"));

    let loaded = MemoryAuditLog::load_from_file(&path).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|e| e.mode == "LIVE"));
    assert!(config.artifact_dir.join("configured_result.json").exists());
}
