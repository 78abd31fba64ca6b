//! # Stagecraft
//!
//! Linear multi-stage pipelines with retries, audit events and persisted run
//! reports.
//!
//! A [`Pipeline`] owns an ordered list of stages. Each stage wraps a
//! [`StageHandler`] that turns one data value into the next. Running the
//! pipeline threads the value through every stage and returns a single
//! [`PipelineResult`] describing what happened.
//!
//! - **Required or optional** - a failed required stage stops the run, a
//!   failed optional stage is recorded and skipped over
//! - **Immediate retries** - per-stage retry policy, no backoff
//! - **Audited** - `pipeline_start`, `stage_execute` and `pipeline_complete`
//!   events go to an optional [`AuditEmitter`]
//! - **Persisted** - every run report is handed to a [`ResultSink`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagecraft::{handler_fn, JsonFileSink, MemoryAuditLog, Pipeline, StageOptions};
//! use std::sync::Arc;
//!
//! let audit = Arc::new(MemoryAuditLog::new("TEST"));
//! let pipeline = Pipeline::new("intake")
//!     .with_mode("DRY_RUN")
//!     .with_audit(audit.clone())
//!     .with_sink(JsonFileSink::new("./artifacts"))
//!     .add_stage("normalize", NormalizeRecords, StageOptions::new())?
//!     .add_stage("estimate", EstimateSurplus, StageOptions::new().retry(2))?
//!     .add_stage("enrich", handler_fn(enrich), StageOptions::new().optional())?;
//!
//! let result = pipeline.execute(input).await?;
//! println!("{} ({} stages)", result.status, result.stage_results.len());
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - Enable SQLite-backed audit log and result sink

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod result;
pub mod retry;
pub mod sink;
pub mod stage;

pub use audit::{
    AuditAction, AuditEmitter, AuditEntry, AuditEvent, AuditQuery, MemoryAuditLog, ObjectType,
};
pub use config::{Config, ConfigError, RunMode};
pub use error::PipelineError;
pub use executor::StageExecutor;
pub use pipeline::{Pipeline, PipelineGraph, StageNode};
pub use result::{PipelineResult, PipelineStatus, RunMetadata, StageResult, StageStatus};
pub use retry::RetryPolicy;
pub use sink::{JsonFileSink, NoopSink, ResultSink};
pub use stage::{handler_fn, FnHandler, Metadata, Stage, StageError, StageHandler, StageOptions};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAuditLog, SqliteResultSink};
