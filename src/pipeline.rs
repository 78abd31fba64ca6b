//! Pipeline controller: stage registration and sequential execution.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::audit::{details, AuditAction, AuditEmitter, AuditEvent, ObjectType};
use crate::config::Config;
use crate::error::PipelineError;
use crate::executor::{elapsed_ms, StageExecutor};
use crate::result::{overall_status, PipelineResult, RunMetadata, StageStatus};
use crate::retry::RetryPolicy;
use crate::sink::{JsonFileSink, NoopSink, ResultSink};
use crate::stage::{Metadata, Stage, StageHandler, StageOptions};

/// Serializable description of a pipeline's stages.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineGraph {
    pub name: String,
    pub mode: String,
    pub stages: Vec<StageNode>,
}

/// A stage in the pipeline graph.
#[derive(Debug, Clone, Serialize)]
pub struct StageNode {
    pub name: String,
    pub index: usize,
    pub required: bool,
    pub retry: RetryPolicy,
    #[serde(flatten)]
    pub metadata: Metadata,
}

/// An ordered list of stages run over a single data value.
///
/// Stages run one after another. Each successful stage replaces the data
/// value; a failed stage leaves it untouched. A failed required stage ends
/// the run, a failed optional one does not.
///
/// `execute` takes `&self` and keeps every piece of run state local, so one
/// pipeline can serve any number of concurrent runs.
pub struct Pipeline<T> {
    name: String,
    mode: String,
    stages: Vec<Stage<T>>,
    audit: Option<Arc<dyn AuditEmitter>>,
    sink: Arc<dyn ResultSink<T>>,
}

impl<T> Pipeline<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty pipeline in `TEST` mode that discards its results.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: crate::config::RunMode::default().to_string(),
            stages: Vec::new(),
            audit: None,
            sink: Arc::new(NoopSink),
        }
    }

    /// Set the mode string recorded in every result.
    ///
    /// The engine never interprets it.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Send audit events to `emitter`.
    pub fn with_audit<A: AuditEmitter + 'static>(mut self, emitter: A) -> Self {
        self.audit = Some(Arc::new(emitter));
        self
    }

    /// Persist results through `sink`.
    pub fn with_sink<S: ResultSink<T> + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Register a stage at the end of the pipeline.
    ///
    /// Duplicate names are allowed. Fails if `max_retries` is negative.
    pub fn add_stage<H>(
        mut self,
        name: &str,
        handler: H,
        options: StageOptions,
    ) -> Result<Self, PipelineError>
    where
        H: StageHandler<T> + 'static,
    {
        let retry = RetryPolicy::checked(options.retry_enabled, options.max_retries).ok_or_else(
            || PipelineError::InvalidStage {
                stage: name.to_string(),
                reason: format!(
                    "max_retries must be non-negative, got {}",
                    options.max_retries
                ),
            },
        )?;

        self.stages.push(Stage {
            name: name.to_string(),
            handler: Arc::new(handler),
            required: options.required,
            retry,
            metadata: options.metadata,
        });
        Ok(self)
    }

    /// Add a required stage with default options.
    pub fn stage<H>(mut self, name: &str, handler: H) -> Self
    where
        H: StageHandler<T> + 'static,
    {
        self.push_default(name, handler, true);
        self
    }

    /// Add an optional stage with default options.
    pub fn optional_stage<H>(mut self, name: &str, handler: H) -> Self
    where
        H: StageHandler<T> + 'static,
    {
        self.push_default(name, handler, false);
        self
    }

    fn push_default<H>(&mut self, name: &str, handler: H, required: bool)
    where
        H: StageHandler<T> + 'static,
    {
        self.stages.push(Stage {
            name: name.to_string(),
            handler: Arc::new(handler),
            required,
            retry: RetryPolicy::none(),
            metadata: Metadata::default(),
        });
    }

    /// The pipeline name, used as the audit actor and the sink key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mode string recorded in every result.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Number of registered stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Registered stages in execution order.
    pub fn stages(&self) -> &[Stage<T>] {
        &self.stages
    }

    /// Run every stage over `initial_data` and return the aggregated result.
    ///
    /// Handler failures are captured in the result. `Err` is returned only
    /// when the audit emitter or the result sink fails.
    pub async fn execute(&self, initial_data: T) -> Result<PipelineResult<T>, PipelineError> {
        let start_time = Utc::now();
        let started = Instant::now();

        info!(
            pipeline = %self.name,
            mode = %self.mode,
            stage_count = self.stages.len(),
            "Starting pipeline"
        );
        self.emit(
            AuditAction::PipelineStart,
            "ok",
            json!({ "stage_count": self.stages.len() }),
        )
        .await?;

        let executor = StageExecutor::new(&self.name, self.audit.as_deref());
        let mut current = initial_data;
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let result = executor.execute(stage, &current).await?;
            let failed = result.status == StageStatus::Error;

            if let Some(output) = &result.output {
                current = output.clone();
            }
            if failed && stage.is_required() {
                error!(
                    pipeline = %self.name,
                    stage = stage.name(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "Required stage failed, stopping pipeline"
                );
                stage_results.push(result);
                break;
            }
            // A failed optional stage leaves `current` as it was.
            stage_results.push(result);
        }

        let status = overall_status(
            self.stages
                .iter()
                .zip(&stage_results)
                .map(|(stage, result)| (stage.is_required(), result.status)),
        );

        let end_time = Utc::now();
        let successful_stages = stage_results.iter().filter(|r| r.is_ok()).count();
        let metadata = RunMetadata {
            start_time,
            end_time,
            duration_ms: elapsed_ms(started),
            total_stages: self.stages.len(),
            successful_stages,
            failed_stages: stage_results.len() - successful_stages,
        };

        let result = PipelineResult {
            pipeline_name: self.name.clone(),
            status,
            mode: self.mode.clone(),
            output: current,
            stage_results,
            metadata,
        };

        let location = self
            .sink
            .save(&self.name, &result)
            .await
            .map_err(PipelineError::Sink)?;

        info!(
            pipeline = %self.name,
            status = %result.status,
            duration_ms = result.metadata.duration_ms,
            successful_stages = result.metadata.successful_stages,
            failed_stages = result.metadata.failed_stages,
            location = %location,
            "Pipeline complete"
        );
        self.emit(
            AuditAction::PipelineComplete,
            result.status.as_str(),
            serde_json::to_value(&result.metadata).unwrap_or_default(),
        )
        .await?;

        Ok(result)
    }

    /// Export the pipeline structure for reporting or visualization.
    pub fn to_graph(&self) -> PipelineGraph {
        PipelineGraph {
            name: self.name.clone(),
            mode: self.mode.clone(),
            stages: self
                .stages
                .iter()
                .enumerate()
                .map(|(index, stage)| StageNode {
                    name: stage.name.clone(),
                    index,
                    required: stage.required,
                    retry: stage.retry,
                    metadata: stage.metadata.clone(),
                })
                .collect(),
        }
    }

    async fn emit(
        &self,
        action: AuditAction,
        result: &str,
        event_details: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let Some(audit) = &self.audit else {
            return Ok(());
        };
        audit
            .log(AuditEvent {
                action,
                actor: self.name.clone(),
                object_type: ObjectType::Pipeline,
                object_id: self.name.clone(),
                result: result.to_string(),
                details: details(event_details),
            })
            .await
            .map_err(PipelineError::Audit)
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("stages", &self.stages)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> Pipeline<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    /// Create a pipeline using the mode and artifact directory of `config`.
    pub fn from_config(name: impl Into<String>, config: &Config) -> Self {
        Self::new(name)
            .with_mode(config.mode.to_string())
            .with_sink(JsonFileSink::new(&config.artifact_dir))
    }
}
