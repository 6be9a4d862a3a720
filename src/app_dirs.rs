//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/autorefresher/` | `~/.local/share/autorefresher/` |
//! | Config | `~/Library/Application Support/autorefresher/` | `~/.config/autorefresher/` |
//!
//! # Environment Overrides
//!
//! - `AUTOREFRESHER_DATA_DIR` overrides [`data_dir`]
//! - `AUTOREFRESHER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "autorefresher";

/// Application data root, home of the persisted state file.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AUTOREFRESHER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/autorefresher-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AUTOREFRESHER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/autorefresher-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default persisted state path (`data_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    data_dir().join("state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_are_nonempty() {
        assert!(!data_dir().as_os_str().is_empty());
        assert!(!config_dir().as_os_str().is_empty());
    }

    #[test]
    fn config_file_ends_with_config_toml() {
        assert!(config_file().ends_with("config.toml"));
        assert!(config_file().starts_with(config_dir()));
    }

    #[test]
    fn state_file_is_under_data_dir() {
        let file = state_file();
        assert!(file.starts_with(data_dir()));
        assert!(file.ends_with("state.json"));
    }
}
