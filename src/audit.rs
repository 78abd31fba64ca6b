//! Audit events emitted while a pipeline runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// File name used by [`MemoryAuditLog::save_in`].
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Actions the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PipelineStart,
    StageExecute,
    PipelineComplete,
}

impl AuditAction {
    /// Name used in serialized events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStart => "pipeline_start",
            Self::StageExecute => "stage_execute",
            Self::PipelineComplete => "pipeline_complete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of object an audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Pipeline,
    Stage,
}

impl ObjectType {
    /// Name used in serialized events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Stage => "stage",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A structured record of one significant action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Name of the pipeline that performed the action.
    pub actor: String,
    pub object_type: ObjectType,
    /// Pipeline or stage name.
    pub object_id: String,
    /// `ok`, `error` or `partial`.
    pub result: String,
    pub details: Map<String, Value>,
}

/// An audit event as stored by an audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
    pub mode: String,
}

impl AuditEntry {
    /// Stamp `event` with the current time and `mode`.
    pub fn new(event: AuditEvent, mode: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            mode: mode.to_string(),
        }
    }
}

/// Convert a JSON object into an event details map.
///
/// Non-object values produce an empty map.
pub(crate) fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Receives audit events from pipelines and stage executors.
///
/// An error returned here aborts the pipeline run that emitted the event.
#[async_trait]
pub trait AuditEmitter: Send + Sync {
    /// Record one event.
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<A: AuditEmitter + ?Sized> AuditEmitter for std::sync::Arc<A> {
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.as_ref().log(event).await
    }
}

/// Filter for [`MemoryAuditLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub actor: Option<String>,
    pub object_type: Option<ObjectType>,
    pub result: Option<String>,
}

impl AuditQuery {
    /// A query matching every entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only entries with this action.
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Only entries logged by `actor`.
    pub fn actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    /// Only entries about this kind of object.
    pub fn object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = Some(object_type);
        self
    }

    /// Only entries with this result string.
    pub fn result(mut self, result: &str) -> Self {
        self.result = Some(result.to_string());
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        let event = &entry.event;
        self.action.map_or(true, |a| a == event.action)
            && self.actor.as_deref().map_or(true, |a| a == event.actor)
            && self.object_type.map_or(true, |t| t == event.object_type)
            && self.result.as_deref().map_or(true, |r| r == event.result)
    }
}

/// Audit log that keeps entries in memory.
///
/// Entries can be flushed to a JSON-lines file with [`save`](Self::save).
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    mode: String,
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Create an empty log stamping entries with `mode`.
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The mode stamped on every entry.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Store an event and return the created entry.
    pub fn record(&self, event: AuditEvent) -> AuditEntry {
        let entry = AuditEntry::new(event, &self.mode);
        self.lock().push(entry.clone());
        entry
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries matching every set field of `query`.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }

    /// Append all entries to a JSON-lines file, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buf = String::new();
        for entry in self.entries() {
            buf.push_str(&serde_json::to_string(&entry)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append all entries to `audit.jsonl` inside `dir` and return its path.
    ///
    /// `dir` is usually [`Config::audit_dir`](crate::Config::audit_dir).
    pub async fn save_in(&self, dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let path = dir.as_ref().join(AUDIT_FILE_NAME);
        self.save(&path).await?;
        Ok(path)
    }

    /// Read entries back from a JSON-lines file.
    ///
    /// A missing file yields no entries; blank lines are skipped.
    pub async fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<AuditEntry>> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<AuditEntry>(line).map_err(anyhow::Error::from))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        // A poisoned lock still holds valid entries.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditEmitter for MemoryAuditLog {
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }
}
