//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the run mode.
pub const ENV_MODE: &str = "STAGECRAFT_MODE";
/// Environment variable holding the artifact directory.
pub const ENV_ARTIFACT_DIR: &str = "STAGECRAFT_ARTIFACT_DIR";
/// Environment variable holding the audit directory.
pub const ENV_AUDIT_DIR: &str = "STAGECRAFT_AUDIT_DIR";
/// Environment variable holding the run timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "STAGECRAFT_TIMEOUT_SECS";

/// Error produced while loading configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid mode '{0}': expected one of TEST, DRY_RUN, LIVE")]
    InvalidMode(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Operating mode recorded in results and audit entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    #[default]
    Test,
    DryRun,
    Live,
}

impl RunMode {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::DryRun => "DRY_RUN",
            Self::Live => "LIVE",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEST" => Ok(Self::Test),
            "DRY_RUN" => Ok(Self::DryRun),
            "LIVE" => Ok(Self::Live),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Settings shared by the pipelines of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: RunMode,
    /// Where result sinks write pipeline results.
    pub artifact_dir: PathBuf,
    /// Where audit logs are saved.
    pub audit_dir: PathBuf,
    /// Per-run timeout.
    ///
    /// Declared for callers that carry it around; the engine never enforces
    /// it and a run always proceeds to completion.
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            artifact_dir: PathBuf::from("./artifacts"),
            audit_dir: PathBuf::from("./audit"),
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from `STAGECRAFT_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = mode.trim().parse()?;
        }
        if let Some(dir) = lookup(ENV_ARTIFACT_DIR) {
            config.artifact_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_AUDIT_DIR) {
            config.audit_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let parsed = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_TIMEOUT_SECS.to_string(),
                    value: secs.clone(),
                })?;
            config.timeout_secs = Some(parsed);
        }

        Ok(config)
    }

    /// The configured per-run timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
