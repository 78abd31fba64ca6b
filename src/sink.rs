//! Persistence of finished pipeline results.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::result::PipelineResult;

/// Persists the result of a pipeline run.
///
/// Called once per run, after the result is assembled. A later save for the
/// same pipeline name replaces the earlier one.
#[async_trait]
pub trait ResultSink<T>: Send + Sync {
    /// Store `result` and return where it went.
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<T>) -> anyhow::Result<String>;
}

#[async_trait]
impl<T, S> ResultSink<T> for Arc<S>
where
    T: Sync,
    S: ResultSink<T> + ?Sized,
{
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<T>) -> anyhow::Result<String> {
        self.as_ref().save(pipeline_name, result).await
    }
}

/// A sink that discards every result.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl NoopSink {
    /// Create a sink that stores nothing.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<T: Sync> ResultSink<T> for NoopSink {
    async fn save(&self, _pipeline_name: &str, _result: &PipelineResult<T>) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Distinguishes temp files of saves running at the same time.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes each result as pretty-printed JSON to `<dir>/<pipeline>_result.json`.
///
/// The document is written to a temp file in the same directory and renamed
/// over the target, so readers and overlapping runs only ever see a complete
/// document.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    /// Create a sink writing into `dir`, created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory results are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the result of `pipeline_name` is written to.
    pub fn path_for(&self, pipeline_name: &str) -> PathBuf {
        self.dir.join(format!("{}_result.json", pipeline_name))
    }

    fn temp_path_for(&self, pipeline_name: &str) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}_result.json.{}.{}.tmp",
            pipeline_name,
            std::process::id(),
            seq
        ))
    }
}

#[async_trait]
impl<T> ResultSink<T> for JsonFileSink
where
    T: Serialize + Sync,
{
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<T>) -> anyhow::Result<String> {
        let json = serde_json::to_string_pretty(result)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(pipeline_name);
        let temp_path = self.temp_path_for(pipeline_name);

        // Atomic write: write to temp file, then rename
        let written = match tokio::fs::write(&temp_path, json).await {
            Ok(()) => tokio::fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(path.display().to_string())
    }
}
