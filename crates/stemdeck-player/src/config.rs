//! Player configuration for stemdeck-player
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/stemdeck/config.yaml

use serde::{Deserialize, Serialize};

use stemdeck_core::audio::AudioConfig;
use stemdeck_core::engine::PadConfig;
use stemdeck_core::session::SessionConfig;

pub use stemdeck_core::config::{default_config_path, load_config};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output device, buffer size and sample rate
    pub audio: AudioConfig,
    /// Tick interval, undo depth, loader tuning
    pub session: SessionConfig,
    /// Ambient pad; disabled while `pad.sample` is unset
    pub pad: PadConfig,
    /// Print a status line on every published tick while playing
    pub follow: bool,
}

impl PlayerConfig {
    pub fn pad_enabled(&self) -> bool {
        self.pad.sample.is_some()
    }
}
