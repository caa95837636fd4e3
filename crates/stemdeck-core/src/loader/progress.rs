//! Per-track and aggregate load progress

use crate::song::TrackId;

/// Load progress for one cycle
///
/// Each track reports a percentage in 0..=100; `overall` is the arithmetic
/// mean across all tracks of the cycle and is recomputed on every update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadProgress {
    tracks: Vec<(TrackId, f32)>,
    overall: f32,
}

impl LoadProgress {
    /// Fresh progress for a track set, every entry at zero
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a TrackId>) -> Self {
        Self {
            tracks: ids.into_iter().map(|id| (id.clone(), 0.0)).collect(),
            overall: 0.0,
        }
    }

    pub fn overall(&self) -> f32 {
        self.overall
    }

    pub fn track(&self, id: &TrackId) -> Option<f32> {
        self.tracks.iter().find(|(t, _)| t == id).map(|(_, p)| *p)
    }

    /// Track percentages in track order
    pub fn tracks(&self) -> &[(TrackId, f32)] {
        &self.tracks
    }

    /// Record a track percentage; unknown ids are ignored
    pub fn set(&mut self, id: &TrackId, percent: f32) {
        let Some(entry) = self.tracks.iter_mut().find(|(t, _)| t == id) else {
            return;
        };
        entry.1 = percent.clamp(0.0, 100.0);
        self.recompute();
    }

    /// Pin the aggregate to 100 once a cycle has settled successfully
    ///
    /// Failed tracks keep their last percentage.
    pub fn complete(&mut self) {
        self.overall = 100.0;
    }

    fn recompute(&mut self) {
        self.overall = if self.tracks.is_empty() {
            0.0
        } else {
            self.tracks.iter().map(|(_, p)| p).sum::<f32>() / self.tracks.len() as f32
        };
    }
}
