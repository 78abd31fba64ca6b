//! Pipeline-level error types.

use thiserror::Error;

/// Error returned by stage registration or pipeline execution.
///
/// Handler failures never show up here; they are recorded in the
/// stage results instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage was registered with invalid options.
    #[error("invalid stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    /// The audit emitter failed.
    #[error("audit error: {0}")]
    Audit(#[source] anyhow::Error),

    /// The result sink failed.
    #[error("result sink error: {0}")]
    Sink(#[source] anyhow::Error),
}
