//! Song and track descriptors
//!
//! A [`Song`] is the unit the library hands to the player: an ordered list of
//! [`Track`] stems plus display metadata. Songs can be authored as YAML
//! manifests; relative track locators resolve against the manifest directory.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default fader position for newly authored tracks
pub const DEFAULT_TRACK_VOLUME: f32 = 0.8;

/// Default fixed trim for newly authored tracks
pub const DEFAULT_TRACK_GAIN: f32 = 0.5;

/// Stable track identifier, unique within one song
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Channel strip color tag (cosmetic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackColor {
    #[default]
    Slate,
    Red,
    Orange,
    Amber,
    Lime,
    Green,
    Emerald,
    Cyan,
    Sky,
    Indigo,
    Violet,
    Fuchsia,
    Rose,
}

fn default_volume() -> f32 {
    DEFAULT_TRACK_VOLUME
}

fn default_gain() -> f32 {
    DEFAULT_TRACK_GAIN
}

/// One stem of a song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Secondary label shown under the name (e.g. "Lead", "Backing")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_name: Option<String>,
    /// Source locator: path, `file://`, `http(s)://` or `mem://`
    pub url: String,
    /// User fader, 0..=1
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Fixed per-track trim, 0..=1
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_soloed: bool,
    #[serde(default)]
    pub color: TrackColor,
}

impl Track {
    /// Create a track with default mixer state
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            name: name.into(),
            sub_name: None,
            url: url.into(),
            volume: DEFAULT_TRACK_VOLUME,
            gain: DEFAULT_TRACK_GAIN,
            is_muted: false,
            is_soloed: false,
            color: TrackColor::default(),
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.clamp(0.0, 1.0);
        self
    }

    pub fn with_color(mut self, color: TrackColor) -> Self {
        self.color = color;
        self
    }

    /// Merge a partial mixer update into this track
    ///
    /// Volume and gain are clamped to 0..=1. Fields left as `None` are kept.
    pub fn apply(&mut self, update: &TrackUpdate) {
        if let Some(volume) = update.volume {
            self.volume = volume.clamp(0.0, 1.0);
        }
        if let Some(gain) = update.gain {
            self.gain = gain.clamp(0.0, 1.0);
        }
        if let Some(muted) = update.is_muted {
            self.is_muted = muted;
        }
        if let Some(soloed) = update.is_soloed {
            self.is_soloed = soloed;
        }
    }
}

/// Partial mixer update for one track
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackUpdate {
    pub volume: Option<f32>,
    pub gain: Option<f32>,
    pub is_muted: Option<bool>,
    pub is_soloed: Option<bool>,
}

impl TrackUpdate {
    pub fn volume(volume: f32) -> Self {
        Self { volume: Some(volume), ..Default::default() }
    }

    pub fn gain(gain: f32) -> Self {
        Self { gain: Some(gain), ..Default::default() }
    }

    pub fn muted(muted: bool) -> Self {
        Self { is_muted: Some(muted), ..Default::default() }
    }

    pub fn soloed(soloed: bool) -> Self {
        Self { is_soloed: Some(soloed), ..Default::default() }
    }

    /// True when the update carries no fields
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.gain.is_none() && self.is_muted.is_none() && self.is_soloed.is_none()
    }
}

/// A labelled span of the song, as a fraction of total length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongSection {
    pub label: String,
    pub length: f64,
}

/// A song: ordered stems plus display metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub bpm: f64,
    pub tracks: Vec<Track>,
    /// Optional structure for display; playback never depends on it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structure: Vec<SongSection>,
}

impl Song {
    /// Load a song manifest from YAML
    ///
    /// Relative track locators (no scheme, not absolute) are resolved against
    /// the manifest's directory so a song folder can be moved as a unit.
    pub fn load_manifest(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read song manifest: {:?}", path))?;
        let mut song: Song = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse song manifest: {:?}", path))?;

        song.validate()?;

        if let Some(base) = path.parent() {
            for track in &mut song.tracks {
                if !track.url.contains("://") && Path::new(&track.url).is_relative() {
                    track.url = base.join(&track.url).to_string_lossy().into_owned();
                }
            }
        }

        log::info!(
            "Loaded song manifest '{}' with {} tracks from {:?}",
            song.title,
            song.tracks.len(),
            path
        );
        Ok(song)
    }

    /// Check that track identifiers are unique
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = first_duplicate(&self.tracks) {
            anyhow::bail!("Duplicate track id '{}' in song '{}'", id, self.title);
        }
        Ok(())
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    /// Find the structure section covering a position (0..=1 of song length)
    ///
    /// Returns the section index and the section itself. Positions past the
    /// last boundary map to the last section.
    pub fn section_at(&self, fraction: f64) -> Option<(usize, &SongSection)> {
        if self.structure.is_empty() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let mut boundary = 0.0;
        for (index, section) in self.structure.iter().enumerate() {
            boundary += section.length;
            if fraction < boundary {
                return Some((index, section));
            }
        }
        let last = self.structure.len() - 1;
        Some((last, &self.structure[last]))
    }
}

/// First track id that appears more than once, in track order
pub fn first_duplicate(tracks: &[Track]) -> Option<&TrackId> {
    let mut seen = std::collections::HashSet::new();
    tracks.iter().map(|t| &t.id).find(|id| !seen.insert(*id))
}
