//! Retry policy configuration.

use serde::Serialize;

/// Default number of additional attempts when retries are enabled.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Policy for retrying a failed stage.
///
/// Retries happen immediately, with no delay between attempts, and always
/// reuse the stage's original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Whether failed attempts are retried at all.
    pub enabled: bool,
    /// Maximum number of additional attempts after the first.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// No retries - a single attempt.
    pub fn none() -> Self {
        Self {
            enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Retry up to `max_retries` additional times.
    pub fn retries(max_retries: u32) -> Self {
        Self {
            enabled: true,
            max_retries,
        }
    }

    /// Build a policy from unchecked values.
    ///
    /// Returns `None` if `max_retries` is negative or does not fit.
    pub fn checked(enabled: bool, max_retries: i64) -> Option<Self> {
        let max_retries = u32::try_from(max_retries).ok()?;
        Some(Self {
            enabled,
            max_retries,
        })
    }

    /// Total number of handler invocations allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts()
    }
}
