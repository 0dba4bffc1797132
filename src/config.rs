//! Configuration management for the guard.
//!
//! Settings are layered: defaults, then an optional YAML file, then environment
//! variables prefixed with `GUARD__` (for example `GUARD__LIMITER__MAX_KEYS=5000`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::ratelimit::{TimeWindow, DEFAULT_MAX_KEYS};

/// Main configuration for the guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Path to the policy registry YAML file
    #[serde(default)]
    pub policies_path: Option<String>,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window that rate-mode policies are measured over
    #[serde(default)]
    pub window: TimeWindow,

    /// Maximum number of tracked keys of each kind
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Interval between background sweeps of expired rate windows; 0 disables the sweep
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            max_keys: default_max_keys(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

impl LimiterConfig {
    /// Interval of the background eviction task, if it is enabled.
    pub fn eviction_interval(&self) -> Option<Duration> {
        match self.eviction_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_max_keys() -> usize {
    DEFAULT_MAX_KEYS
}

fn default_eviction_interval() -> u64 {
    60
}

const ENV_PREFIX: &str = "GUARD";

impl GuardConfig {
    /// Load configuration from an optional YAML file, overridden by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(GuardError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize::<Self>())
            .map_err(|e| GuardError::Config(e.to_string()))
    }

    /// Load configuration from a file path, overridden by the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(Path::new(path)))
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(|config| config.try_deserialize::<Self>())
            .map_err(|e| GuardError::Config(e.to_string()))
    }
}
