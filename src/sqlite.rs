//! SQLite-backed audit log and result sink.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::audit::{AuditEmitter, AuditEntry, AuditEvent};
use crate::result::PipelineResult;
use crate::sink::ResultSink;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    id INTEGER PRIMARY KEY,
    recorded_at TEXT NOT NULL,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    object_type TEXT NOT NULL,
    object_id TEXT NOT NULL,
    result TEXT NOT NULL,
    details TEXT NOT NULL,
    mode TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_results (
    pipeline_name TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    mode TEXT NOT NULL,
    result TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_audit_entries_actor ON audit_entries(actor, recorded_at);
CREATE INDEX IF NOT EXISTS idx_audit_entries_action ON audit_entries(action);
"#;

/// Create the tables used by [`SqliteAuditLog`] and [`SqliteResultSink`].
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in SCHEMA.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// Audit log storing one row per event.
#[derive(Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
    mode: String,
}

impl SqliteAuditLog {
    /// Create an audit log stamping entries with `mode`.
    pub fn new(pool: SqlitePool, mode: impl Into<String>) -> Self {
        Self {
            pool,
            mode: mode.into(),
        }
    }

    /// Run database migrations to create required tables.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        run_migrations(&self.pool).await
    }

    /// All entries logged by `actor`, oldest first.
    pub async fn entries_for(&self, actor: &str) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT recorded_at, action, actor, object_type, object_id, result, details, mode \
             FROM audit_entries WHERE actor = ? ORDER BY id",
        )
        .bind(actor)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> anyhow::Result<AuditEntry> {
                let recorded_at: String = row.try_get("recorded_at")?;
                let action: String = row.try_get("action")?;
                let object_type: String = row.try_get("object_type")?;
                let details: String = row.try_get("details")?;

                Ok(AuditEntry {
                    timestamp: chrono::DateTime::parse_from_rfc3339(&recorded_at)?
                        .with_timezone(&chrono::Utc),
                    event: AuditEvent {
                        action: serde_json::from_value(serde_json::Value::String(action))?,
                        actor: row.try_get("actor")?,
                        object_type: serde_json::from_value(serde_json::Value::String(
                            object_type,
                        ))?,
                        object_id: row.try_get("object_id")?,
                        result: row.try_get("result")?,
                        details: serde_json::from_str(&details)?,
                    },
                    mode: row.try_get("mode")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditEmitter for SqliteAuditLog {
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()> {
        let entry = AuditEntry::new(event, &self.mode);
        let details = serde_json::to_string(&entry.event.details)?;

        sqlx::query(
            "INSERT INTO audit_entries \
             (recorded_at, action, actor, object_type, object_id, result, details, mode) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.event.action.as_str())
        .bind(entry.event.actor.as_str())
        .bind(entry.event.object_type.as_str())
        .bind(entry.event.object_id.as_str())
        .bind(entry.event.result.as_str())
        .bind(details)
        .bind(entry.mode.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Result sink keeping the latest result of each pipeline.
#[derive(Clone)]
pub struct SqliteResultSink {
    pool: SqlitePool,
}

impl SqliteResultSink {
    /// Create a sink writing to `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        run_migrations(&self.pool).await
    }

    /// The stored result document for `pipeline_name`, if any.
    pub async fn load(&self, pipeline_name: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT result FROM pipeline_results WHERE pipeline_name = ?")
                .bind(pipeline_name)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T> ResultSink<T> for SqliteResultSink
where
    T: Serialize + Sync,
{
    async fn save(&self, pipeline_name: &str, result: &PipelineResult<T>) -> anyhow::Result<String> {
        let json = serde_json::to_string(result)?;

        sqlx::query(
            "INSERT INTO pipeline_results (pipeline_name, status, mode, result, saved_at) \
             VALUES (?, ?, ?, ?, datetime('now')) \
             ON CONFLICT(pipeline_name) DO UPDATE SET \
             status = excluded.status, mode = excluded.mode, \
             result = excluded.result, saved_at = excluded.saved_at",
        )
        .bind(pipeline_name)
        .bind(result.status.as_str())
        .bind(result.mode.as_str())
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(format!("pipeline_results/{}", pipeline_name))
    }
}
