//! Ambient pad - one looping sample transposed to the chosen key
//!
//! The pad is a one-track transport without a timeline: a single looping
//! [`Voice`] fed through its own [`MixNode`]. Changing key while sounding
//! fades the current voice out, then starts a new one at the new rate once
//! the fade has finished. The fade is pure envelope work on the render side;
//! the pending start is driven by [`AmbientPadEngine::tick`].

use std::sync::Arc;

use basedrop::Shared;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::clock::EngineClock;
use super::gc::gc_handle;
use super::mixer::{effective_level, MixNode};
use super::transport::PlaybackSink;
use super::voice::Voice;
use crate::audio_file::LoadedBuffer;
use crate::loader::{load_buffer, AssetSource, TrackLoadError, DEFAULT_CHUNK_SIZE};
use crate::music::MusicalKey;
use crate::song::{Track, TrackColor};

/// Pad behaviour and sample location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadConfig {
    /// Locator of the looping pad sample; the pad is unavailable without one
    pub sample: Option<String>,
    /// Key the sample was recorded in
    pub base_key: String,
    pub volume: f32,
    pub fade_in_secs: f64,
    /// Fade-out before a key change starts the new voice
    pub crossfade_out_secs: f64,
    /// Fade-out on power off or when the active key is pressed again
    pub release_secs: f64,
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            sample: None,
            base_key: "C".to_string(),
            volume: 0.5,
            fade_in_secs: 1.0,
            crossfade_out_secs: 0.5,
            release_secs: 1.0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PadError {
    #[error("no pad sample configured")]
    NoSample,

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("pad sample failed to load: {0}")]
    Load(#[from] TrackLoadError),
}

pub struct AmbientPadEngine {
    config: PadConfig,
    base_key: MusicalKey,
    source: Arc<dyn AssetSource>,
    clock: Arc<dyn EngineClock>,
    buffer: Option<Shared<LoadedBuffer>>,
    track: Track,
    node: Arc<MixNode>,
    powered: bool,
    active_key: Option<MusicalKey>,
    /// Key waiting for the cross-fade to finish, and when to start it
    pending: Option<(MusicalKey, f64)>,
}

impl AmbientPadEngine {
    pub fn new(
        config: PadConfig,
        source: Arc<dyn AssetSource>,
        clock: Arc<dyn EngineClock>,
    ) -> Result<Self, PadError> {
        let base_key =
            MusicalKey::parse(&config.base_key).ok_or_else(|| PadError::UnknownKey(config.base_key.clone()))?;
        let track = Track::new("ambient-pad", "Ambient Pad", config.sample.clone().unwrap_or_default())
            .with_volume(config.volume.clamp(0.0, 1.0))
            .with_gain(1.0)
            .with_color(TrackColor::Cyan);
        let node = Arc::new(MixNode::new(
            track.gain,
            effective_level(track.volume, track.is_muted, false, false),
        ));

        Ok(Self {
            config,
            base_key,
            source,
            clock,
            buffer: None,
            track,
            node,
            powered: false,
            active_key: None,
            pending: None,
        })
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn active_key(&self) -> Option<MusicalKey> {
        self.active_key
    }

    /// The pad's channel strip (volume, mute)
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Turn the pad on, loading the sample on first use
    pub fn power_on(&mut self) -> Result<(), PadError> {
        if self.buffer.is_none() {
            self.buffer = Some(self.load_sample()?);
        }
        self.powered = true;
        log::info!("Ambient pad on");
        Ok(())
    }

    /// Fade out whatever is sounding and turn the pad off
    pub fn power_off(&mut self, sink: &mut dyn PlaybackSink) {
        if self.active_key.is_some() {
            sink.release_pad(self.config.release_secs);
        }
        self.active_key = None;
        self.pending = None;
        self.powered = false;
        log::info!("Ambient pad off");
    }

    /// Press a key button
    ///
    /// Pressing the sounding key fades it out. Pressing another key while
    /// sounding cross-fades to it. Returns false when the pad is off or has
    /// no sample.
    pub fn press_key(&mut self, key: MusicalKey, sink: &mut dyn PlaybackSink) -> bool {
        if !self.powered || self.buffer.is_none() {
            return false;
        }

        if self.active_key.map(|k| k.root) == Some(key.root) {
            sink.release_pad(self.config.release_secs);
            self.active_key = None;
            self.pending = None;
            return true;
        }

        if self.active_key.is_some() {
            sink.release_pad(self.config.crossfade_out_secs);
            let at = self.clock.now() + self.config.crossfade_out_secs;
            self.pending = Some((key, at));
        } else {
            self.start_voice(key, sink);
        }
        self.active_key = Some(key);
        true
    }

    /// Start a pending key once its cross-fade window has passed
    pub fn tick(&mut self, sink: &mut dyn PlaybackSink) {
        let due = matches!(self.pending, Some((_, at)) if self.clock.now() >= at);
        if due {
            if let Some((key, _)) = self.pending.take() {
                self.start_voice(key, sink);
            }
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.track.volume = volume.clamp(0.0, 1.0);
        self.refresh_level();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.track.is_muted = muted;
        self.refresh_level();
    }

    /// Voices follow the node level with a per-block ramp
    fn refresh_level(&self) {
        self.node
            .set_level(effective_level(self.track.volume, self.track.is_muted, false, false));
    }

    fn start_voice(&mut self, key: MusicalKey, sink: &mut dyn PlaybackSink) {
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        let rate = key.playback_rate_from(&self.base_key);
        log::debug!("Pad voice {} at rate {:.4}", key, rate);
        let voice = Voice::looping(buffer.clone(), Arc::clone(&self.node), rate);
        sink.start_pad(voice, self.config.fade_in_secs);
    }

    fn load_sample(&self) -> Result<Shared<LoadedBuffer>, PadError> {
        let locator = self.config.sample.as_deref().ok_or(PadError::NoSample)?;
        log::info!("Loading pad sample {}", locator);

        let buffer = load_buffer(self.source.as_ref(), locator, DEFAULT_CHUNK_SIZE, |_, _| true)?
            .ok_or_else(|| TrackLoadError::Worker("pad sample read abandoned".to_string()))?;
        Ok(Shared::new(&gc_handle(), buffer))
    }
}
