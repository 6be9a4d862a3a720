//! Configuration for the auto-refresher host.

use crate::error::{RefreshError, Result};
use crate::store::STATE_KEY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefresherConfig {
    /// Where the run state is persisted.
    pub storage: StorageConfig,
    /// Bounds on browser round-trips.
    pub timeouts: TimeoutConfig,
    /// Command and event channel sizing.
    pub host: HostConfig,
    /// Log filter.
    pub logging: LoggingConfig,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State file path (None = `<data_dir>/state.json`).
    pub state_file: Option<PathBuf>,
    /// Key the state record is stored under.
    pub state_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            state_key: STATE_KEY.to_owned(),
        }
    }
}

impl StorageConfig {
    /// Configured state file, or the platform default.
    #[must_use]
    pub fn effective_state_file(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(crate::app_dirs::state_file)
    }
}

/// Timeouts for liveness probes and reloads, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub liveness_probe_ms: u64,
    pub reload_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            liveness_probe_ms: 2_000,
            reload_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn liveness_probe(&self) -> Duration {
        Duration::from_millis(self.liveness_probe_ms.max(1))
    }

    #[must_use]
    pub fn reload(&self) -> Duration {
        Duration::from_millis(self.reload_ms.max(1))
    }
}

/// Host channel capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub request_capacity: usize,
    pub event_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            request_capacity: 64,
            event_capacity: 128,
        }
    }
}

/// Logging settings. `RUST_LOG` wins when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

impl RefresherConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RefreshError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RefreshError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Load `path`, using defaults when it is missing or unreadable.
    ///
    /// A load error is returned next to the defaults instead of being
    /// logged, since the binary reads its config (including the log filter)
    /// before the tracing subscriber is installed.
    #[must_use]
    pub fn load_or_default(path: &Path) -> (Self, Option<RefreshError>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::from_file(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}
