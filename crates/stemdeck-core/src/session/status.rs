//! What the session publishes to its displays

use std::collections::BTreeMap;

use thiserror::Error;

use crate::engine::{LoopRegion, TransportState};
use crate::loader::{FatalLoadError, LoadProgress, TrackLoadError};
use crate::song::TrackId;

/// Session-level failures that block playback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// No output device could be opened; every playback call is a no-op
    #[error("audio output unavailable: {0}")]
    PlatformAudioUnavailable(String),

    /// Every track of the active song failed to load
    #[error("{0}")]
    FatalLoad(#[from] FatalLoadError),

    /// A track set named the same track twice; it was not loaded
    #[error("duplicate track id '{0}'")]
    DuplicateTrack(TrackId),
}

/// Snapshot published on every tick and state change
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub current_time: f64,
    pub duration: f64,
    pub loop_region: LoopRegion,
    pub loading_progress: LoadProgress,
    /// Tracks excluded from playback, keyed by id
    pub track_load_errors: BTreeMap<TrackId, TrackLoadError>,
    pub is_playing: bool,
    pub state: TransportState,
    pub error: Option<PlaybackError>,
    pub can_undo: bool,
    pub can_redo: bool,
}

impl PlaybackStatus {
    /// `mm:ss / mm:ss` for console display
    pub fn clock_label(&self) -> String {
        format!("{} / {}", format_time(self.current_time), format_time(self.duration))
    }
}

/// Seconds as `mm:ss`, truncating fractions
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() { seconds.max(0.0) as u64 } else { 0 };
    format!("{:02}:{:02}", total / 60, total % 60)
}
