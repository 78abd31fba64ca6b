//! Tests for audit event emission.

use async_trait::async_trait;
use serde_json::{json, Value};
use stagecraft::{
    handler_fn, AuditAction, AuditEmitter, AuditEvent, AuditQuery, MemoryAuditLog, ObjectType,
    Pipeline, PipelineError, StageError, StageOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn passthrough() -> impl Fn(Value) -> Result<Value, StageError> + Send + Sync {
    |data: Value| Ok(data)
}

fn failing() -> impl Fn(Value) -> Result<Value, StageError> + Send + Sync {
    |_: Value| Err(StageError::msg("boom"))
}

/// Emitter that fails after a given number of successful events.
struct FailingEmitter {
    remaining: AtomicUsize,
}

#[async_trait]
impl AuditEmitter for FailingEmitter {
    async fn log(&self, _event: AuditEvent) -> anyhow::Result<()> {
        if self.remaining.load(Ordering::SeqCst) == 0 {
            anyhow::bail!("audit store unavailable");
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_audit_cardinality() {
    let log = Arc::new(MemoryAuditLog::new("TEST"));
    let pipeline = Pipeline::<Value>::new("audited")
        .with_audit(log.clone())
        .stage("s1", handler_fn(passthrough()))
        .stage("s2", handler_fn(passthrough()))
        .stage("s3", handler_fn(passthrough()));

    pipeline.execute(json!({})).await.unwrap();

    let entries = log.entries();
    assert_eq!(entries.len(), 3 + 2);
    assert_eq!(entries[0].event.action, AuditAction::PipelineStart);
    assert_eq!(entries[0].event.details["stage_count"], 3);
    assert_eq!(entries[4].event.action, AuditAction::PipelineComplete);

    let stage_events: Vec<String> = entries[1..4]
        .iter()
        .map(|e| {
            assert_eq!(e.event.action, AuditAction::StageExecute);
            e.event.object_id.clone()
        })
        .collect();
    assert_eq!(stage_events, vec!["s1", "s2", "s3"]);
}

#[tokio::test]
async fn test_one_stage_event_despite_retries() {
    let log = Arc::new(MemoryAuditLog::new("TEST"));
    let pipeline = Pipeline::<Value>::new("retried").with_audit(log.clone())
        .add_stage("always_fails", handler_fn(failing()), StageOptions::new().retry(4))
        .unwrap();

    pipeline.execute(json!({})).await.unwrap();

    let stage_events = log.query(&AuditQuery::new().action(AuditAction::StageExecute));
    assert_eq!(stage_events.len(), 1);
    assert_eq!(stage_events[0].event.result, "error");
    assert_eq!(stage_events[0].event.details["attempts"], 5);
    assert_eq!(stage_events[0].event.details["error"], "boom");
}

#[tokio::test]
async fn test_complete_event_carries_status_and_metadata() {
    let log = Arc::new(MemoryAuditLog::new("LIVE"));
    let pipeline = Pipeline::<Value>::new("partial_run")
        .with_audit(log.clone())
        .optional_stage("broken", handler_fn(failing()))
        .stage("ok", handler_fn(passthrough()));

    pipeline.execute(json!({})).await.unwrap();

    let complete = log.query(&AuditQuery::new().action(AuditAction::PipelineComplete));
    assert_eq!(complete.len(), 1);
    let event = &complete[0].event;
    assert_eq!(event.result, "partial");
    assert_eq!(event.actor, "partial_run");
    assert_eq!(event.object_type, ObjectType::Pipeline);
    assert_eq!(event.object_id, "partial_run");
    assert_eq!(event.details["total_stages"], 2);
    assert_eq!(event.details["successful_stages"], 1);
    assert_eq!(event.details["failed_stages"], 1);
    assert!(event.details.contains_key("duration_ms"));
    assert_eq!(complete[0].mode, "LIVE");
}

#[tokio::test]
async fn test_truncated_run_emits_no_events_for_skipped_stages() {
    let log = Arc::new(MemoryAuditLog::new("TEST"));
    let pipeline = Pipeline::<Value>::new("aborted")
        .with_audit(log.clone())
        .stage("broken", handler_fn(failing()))
        .stage("never", handler_fn(passthrough()));

    pipeline.execute(json!({})).await.unwrap();

    assert_eq!(log.len(), 3);
    assert!(log
        .query(&AuditQuery::new().object_type(ObjectType::Stage))
        .iter()
        .all(|e| e.event.object_id == "broken"));
}

#[tokio::test]
async fn test_no_emitter_is_fine() {
    let pipeline = Pipeline::<Value>::new("silent").stage("s1", handler_fn(passthrough()));
    let result = pipeline.execute(json!({ "x": 1 })).await.unwrap();
    assert_eq!(result.output, json!({ "x": 1 }));
}

#[tokio::test]
async fn test_audit_failure_propagates() {
    // pipeline_start succeeds, the stage event fails
    let pipeline = Pipeline::<Value>::new("broken_audit")
        .with_audit(FailingEmitter {
            remaining: AtomicUsize::new(1),
        })
        .stage("s1", handler_fn(passthrough()));

    let err = pipeline.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, PipelineError::Audit(_)));
    assert!(err.to_string().contains("audit store unavailable"));
}
