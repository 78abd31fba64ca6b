//! Single-stage execution with retries.

use chrono::Utc;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, warn};

use crate::audit::{details, AuditAction, AuditEmitter, AuditEvent, ObjectType};
use crate::error::PipelineError;
use crate::result::StageResult;
use crate::stage::Stage;

/// Runs one stage's handler under its retry policy.
///
/// Emits a single `stage_execute` audit event once the attempt loop is over.
pub struct StageExecutor<'a> {
    actor: &'a str,
    audit: Option<&'a dyn AuditEmitter>,
}

impl<'a> StageExecutor<'a> {
    /// Create an executor acting on behalf of pipeline `actor`.
    pub fn new(actor: &'a str, audit: Option<&'a dyn AuditEmitter>) -> Self {
        Self { actor, audit }
    }

    /// Execute `stage` against `input`.
    ///
    /// Handler failures end up in the returned [`StageResult`]; only an audit
    /// failure produces `Err`. There is no timeout: a handler that never
    /// returns blocks the executor.
    pub async fn execute<T>(&self, stage: &Stage<T>, input: &T) -> Result<StageResult<T>, PipelineError>
    where
        T: Clone + Send + 'static,
    {
        let started = Instant::now();
        let timestamp = Utc::now();
        let policy = stage.retry_policy();
        let max_attempts = policy.max_attempts();

        debug!(
            pipeline = self.actor,
            stage = stage.name(),
            max_attempts,
            "Executing stage"
        );

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match stage.handler().transform(input.clone()).await {
                Ok(output) => {
                    let duration_ms = elapsed_ms(started);
                    break StageResult::succeeded(stage.name(), output, attempts, duration_ms, timestamp);
                }
                Err(e) => {
                    warn!(
                        pipeline = self.actor,
                        stage = stage.name(),
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "Stage attempt failed"
                    );
                    if !policy.should_retry(attempts) {
                        let duration_ms = elapsed_ms(started);
                        break StageResult::failed(
                            stage.name(),
                            e.to_string(),
                            attempts,
                            duration_ms,
                            timestamp,
                        );
                    }
                }
            }
        };

        if let Some(audit) = self.audit {
            let event_details = match &result.error {
                None => json!({
                    "attempts": result.attempts,
                    "duration_ms": result.duration_ms,
                }),
                Some(error) => json!({
                    "error": error,
                    "attempts": result.attempts,
                    "duration_ms": result.duration_ms,
                }),
            };
            audit
                .log(AuditEvent {
                    action: AuditAction::StageExecute,
                    actor: self.actor.to_string(),
                    object_type: ObjectType::Stage,
                    object_id: stage.name().to_string(),
                    result: result.status.to_string(),
                    details: details(event_details),
                })
                .await
                .map_err(PipelineError::Audit)?;
        }

        Ok(result)
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
