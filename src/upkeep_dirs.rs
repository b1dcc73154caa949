//! Centralized directory paths for upkeep.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Config | `~/.config/upkeep/` | `~/Library/Application Support/upkeep/` |
//! | State | `~/.local/state/upkeep/` | `~/Library/Application Support/upkeep/` |
//! | Data (logs) | `~/.local/share/upkeep/` | `~/Library/Application Support/upkeep/` |
//!
//! # Environment Overrides
//!
//! - `UPKEEP_CONFIG_DIR` overrides [`config_dir`]
//! - `UPKEEP_STATE_DIR` overrides [`state_dir`]
//! - `UPKEEP_DATA_DIR` overrides [`data_dir`]

use std::path::PathBuf;

/// File name of the maintenance record inside [`state_dir`].
pub const STATE_FILE_NAME: &str = "state.json";

/// Config directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("UPKEEP_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("upkeep"))
        .unwrap_or_else(|| PathBuf::from("/tmp/upkeep-config"))
}

/// State directory holding the durable maintenance record and lock files.
///
/// Falls back to [`data_dir`] on platforms without a dedicated state dir.
#[must_use]
pub fn state_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("UPKEEP_STATE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::state_dir()
        .map(|d| d.join("upkeep"))
        .unwrap_or_else(data_dir)
}

/// Application data root.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("UPKEEP_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("upkeep"))
        .unwrap_or_else(|| PathBuf::from("/tmp/upkeep-data"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
