//! Stage handler trait, stage description and error types.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Error returned by a stage handler.
///
/// Every handler failure is treated the same way: the executor retries it
/// while the stage's retry policy allows, then records its message.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct StageError(#[from] anyhow::Error);

impl StageError {
    /// Wrap any error.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(err.into())
    }

    /// Create an error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(anyhow::Error::msg(message))
    }

    /// Access the underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

/// The unit of work behind a stage.
///
/// A handler is a function of its input only: it receives the data value
/// threaded through the pipeline and returns the next one.
#[async_trait]
pub trait StageHandler<T>: Send + Sync {
    /// Transform the current data value.
    async fn transform(&self, data: T) -> Result<T, StageError>;
}

#[async_trait]
impl<T, H> StageHandler<T> for Arc<H>
where
    T: Send + 'static,
    H: StageHandler<T> + ?Sized,
{
    async fn transform(&self, data: T) -> Result<T, StageError> {
        self.as_ref().transform(data).await
    }
}

/// Adapter turning a synchronous closure into a [`StageHandler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a stage handler.
///
/// ```rust,ignore
/// pipeline.stage("double", handler_fn(|n: u32| Ok(n * 2)))?;
/// ```
pub fn handler_fn<T, F>(f: F) -> FnHandler<F>
where
    F: Fn(T) -> Result<T, StageError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<T, F> StageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Result<T, StageError> + Send + Sync,
{
    async fn transform(&self, data: T) -> Result<T, StageError> {
        (self.0)(data)
    }
}

/// Descriptive metadata attached to a stage.
///
/// Used for graph export and reporting; never consulted during execution.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Human-readable description.
    pub description: Option<String>,
    /// Arbitrary key-value tags.
    pub tags: HashMap<String, String>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// Registration options for a stage.
///
/// `max_retries` is signed because it usually arrives from configuration;
/// negative values are rejected when the stage is added.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub required: bool,
    pub retry_enabled: bool,
    pub max_retries: i64,
    pub metadata: Metadata,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            required: true,
            retry_enabled: false,
            max_retries: 3,
            metadata: Metadata::default(),
        }
    }
}

impl StageOptions {
    /// Default options: required, no retries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stage optional; its failure does not abort the run.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set whether the stage is required.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Enable retries with the given number of additional attempts.
    pub fn retry(mut self, max_retries: i64) -> Self {
        self.retry_enabled = true;
        self.max_retries = max_retries;
        self
    }

    /// Add a description.
    pub fn desc(mut self, description: &str) -> Self {
        self.metadata.description = Some(description.to_string());
        self
    }

    /// Add a tag.
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.metadata.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// One registered unit of work.
pub struct Stage<T> {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn StageHandler<T>>,
    pub(crate) required: bool,
    pub(crate) retry: RetryPolicy,
    pub(crate) metadata: Metadata,
}

impl<T> Stage<T> {
    /// The stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a failure of this stage aborts the run.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// The stage's retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Descriptive metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn handler(&self) -> &dyn StageHandler<T> {
        self.handler.as_ref()
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("retry", &self.retry)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
