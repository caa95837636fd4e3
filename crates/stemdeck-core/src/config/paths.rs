//! Standard locations for Stemdeck files

use std::path::PathBuf;

const APP_DIR: &str = "stemdeck";

/// Per-user configuration directory
///
/// Returns: `<config dir>/stemdeck` (e.g. `~/.config/stemdeck` on Linux),
/// or `./stemdeck` when the platform reports no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Default player config file: `<config dir>/stemdeck/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}
