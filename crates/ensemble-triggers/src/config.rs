//! Dispatcher configuration.
//!
//! Everything the dispatcher needs from its environment is carried in a
//! [`DispatcherConfig`] handed to the builder. Nothing here is process-wide.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default submission executable.
pub const DEFAULT_SUBMIT_TOOL: &str = "pegasus-em";

pub const ENV_TRIGGER_DIR: &str = "ENSEMBLE_TRIGGER_DIR";
pub const ENV_SUBMIT_TOOL: &str = "ENSEMBLE_SUBMIT_TOOL";
pub const ENV_RECOVERY: &str = "ENSEMBLE_TRIGGER_RECOVERY";

/// What the dispatcher does with snapshots left by a previous process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Ignore the previous running set and start with no triggers.
    #[default]
    StartClean,
    /// Respawn every previously running trigger that has a stored definition.
    Restore,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartClean => "start_clean",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "start_clean" => Ok(Self::StartClean),
            "restore" => Ok(Self::Restore),
            other => Err(ConfigError {
                key: ENV_RECOVERY.into(),
                message: format!("unknown recovery policy '{other}'"),
            }),
        }
    }
}

/// Configuration for a [`TriggerDispatcher`](crate::triggers::TriggerDispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Directory holding the durable snapshots.
    pub trigger_dir: PathBuf,
    /// Executable invoked as `<submit_tool> submit ...`.
    pub submit_tool: String,
    pub recovery: RecoveryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            trigger_dir: default_trigger_dir(),
            submit_tool: DEFAULT_SUBMIT_TOOL.to_string(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(trigger_dir: impl Into<PathBuf>) -> Self {
        Self {
            trigger_dir: trigger_dir.into(),
            ..Self::default()
        }
    }

    pub fn trigger_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.trigger_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn submit_tool(mut self, tool: impl Into<String>) -> Self {
        self.submit_tool = tool.into();
        self
    }

    pub fn recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Defaults overridden by `ENSEMBLE_TRIGGER_DIR`,
    /// `ENSEMBLE_SUBMIT_TOOL` and `ENSEMBLE_TRIGGER_RECOVERY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_TRIGGER_DIR) {
            config.trigger_dir = PathBuf::from(dir);
        }
        if let Some(tool) = get(ENV_SUBMIT_TOOL) {
            config.submit_tool = tool.trim().to_string();
        }
        if let Some(recovery) = get(ENV_RECOVERY) {
            config.recovery = recovery.parse()?;
        }

        Ok(config)
    }
}

/// `$HOME/.ensembles/triggers`, or a relative `.ensembles/triggers` when the
/// home directory is unknown.
fn default_trigger_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ensembles")
        .join("triggers")
}
