//! Stage and pipeline run reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The handler returned a value.
    Ok,
    /// Every allowed attempt failed.
    Error,
}

impl StageStatus {
    /// Lowercase name used in result documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Every executed stage succeeded.
    Ok,
    /// Only optional stages failed.
    Partial,
    /// A required stage failed and the run stopped there.
    Error,
}

impl PipelineStatus {
    /// Lowercase name used in result documents and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of executing one stage, retries included.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult<T> {
    pub stage_name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl<T> StageResult<T> {
    pub(crate) fn succeeded(
        stage_name: &str,
        output: T,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            status: StageStatus::Ok,
            output: Some(output),
            error: None,
            attempts,
            duration_ms,
            timestamp,
        }
    }

    pub(crate) fn failed(
        stage_name: &str,
        error: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            status: StageStatus::Error,
            output: None,
            error: Some(error),
            attempts,
            duration_ms,
            timestamp,
        }
    }

    /// Whether the stage succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

/// Timing and counters for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of registered stages, attempted or not.
    pub total_stages: usize,
    pub successful_stages: usize,
    pub failed_stages: usize,
}

/// Aggregated result of one `execute()` call.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult<T> {
    #[serde(rename = "pipeline")]
    pub pipeline_name: String,
    pub status: PipelineStatus,
    pub mode: String,
    /// Data value after the last stage that succeeded.
    pub output: T,
    /// One entry per attempted stage, in execution order.
    #[serde(rename = "stages")]
    pub stage_results: Vec<StageResult<T>>,
    pub metadata: RunMetadata,
}

impl<T> PipelineResult<T> {
    /// First result recorded for the named stage.
    pub fn stage(&self, name: &str) -> Option<&StageResult<T>> {
        self.stage_results.iter().find(|r| r.stage_name == name)
    }

    /// Whether the run finished with status `ok`.
    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Ok
    }

    /// Whether only optional stages failed.
    pub fn is_partial(&self) -> bool {
        self.status == PipelineStatus::Partial
    }
}

/// Decide the overall status from the executed stages.
///
/// Each item pairs a stage's `required` flag with its result status.
pub(crate) fn overall_status<I>(executed: I) -> PipelineStatus
where
    I: IntoIterator<Item = (bool, StageStatus)>,
{
    let mut status = PipelineStatus::Ok;
    for (required, stage_status) in executed {
        if stage_status == StageStatus::Error {
            if required {
                return PipelineStatus::Error;
            }
            status = PipelineStatus::Partial;
        }
    }
    status
}
