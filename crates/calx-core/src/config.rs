//! Kernel and engine configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [kernel]
//! max_wait_ms = 30000
//! stop_grace_ms = 1000
//!
//! [engine]
//! max_operations = 0
//! ```
//!
//! Every key is optional; unknown keys are rejected.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub kernel: KernelConfig,
    pub engine: EngineConfig,
}

/// Scheduler limits.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Longest an update waits for its workers before reporting timeouts.
    pub max_wait_ms: u64,
    /// How long a new run waits for a previous run's worker to stop.
    pub stop_grace_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            max_wait_ms: 30_000,
            stop_grace_ms: 1_000,
        }
    }
}

impl KernelConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Evaluator limits.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Rhai operation budget per formula; 0 means unlimited.
    pub max_operations: u64,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a config file, refusing anything over 1 MiB.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let size = std::fs::metadata(path)?.len();
        if size > MAX_CONFIG_FILE_BYTES {
            return Err(ConfigError::TooLarge {
                size,
                max: MAX_CONFIG_FILE_BYTES,
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
