//! Mixer undo/redo history
//!
//! A linear edit log of complete mixer snapshots. The history is the single
//! writer of track volume/gain/mute/solo; everything else reads
//! [`MixerHistory::current_tracks`].

use crate::song::{Track, TrackId, TrackUpdate};

/// Mixer fields of one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMix {
    pub volume: f32,
    pub gain: f32,
    pub is_muted: bool,
    pub is_soloed: bool,
}

impl From<&Track> for TrackMix {
    fn from(track: &Track) -> Self {
        Self {
            volume: track.volume,
            gain: track.gain,
            is_muted: track.is_muted,
            is_soloed: track.is_soloed,
        }
    }
}

/// Mixer state of every track, in track order
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSnapshot(pub Vec<TrackMix>);

impl MixerSnapshot {
    fn of(tracks: &[Track]) -> Self {
        Self(tracks.iter().map(TrackMix::from).collect())
    }
}

/// Undo/redo log for one song's mixer
pub struct MixerHistory {
    /// Track identities and metadata; mixer fields come from the snapshot
    tracks: Vec<Track>,
    snapshots: Vec<MixerSnapshot>,
    index: usize,
    /// Maximum number of snapshots kept; the oldest is dropped beyond it
    limit: Option<usize>,
}

impl MixerHistory {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            tracks: Vec::new(),
            snapshots: vec![MixerSnapshot(Vec::new())],
            index: 0,
            limit: limit.map(|l| l.max(1)),
        }
    }

    /// Start over with a song's initial track states
    pub fn reset(&mut self, tracks: &[Track]) {
        self.tracks = tracks.to_vec();
        self.snapshots = vec![MixerSnapshot::of(tracks)];
        self.index = 0;
    }

    pub fn snapshot(&self) -> &MixerSnapshot {
        &self.snapshots[self.index]
    }

    /// Tracks with the current snapshot's mixer state applied
    pub fn current_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .zip(self.snapshot().0.iter())
            .map(|(track, mix)| Track {
                volume: mix.volume,
                gain: mix.gain,
                is_muted: mix.is_muted,
                is_soloed: mix.is_soloed,
                ..track.clone()
            })
            .collect()
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &TrackId> {
        self.tracks.iter().map(|t| &t.id)
    }

    /// Record an edit to one track
    ///
    /// Discards any redo tail. Returns false (and records nothing) when the
    /// track is not part of the current song.
    pub fn apply(&mut self, id: &TrackId, update: &TrackUpdate) -> bool {
        let Some(position) = self.tracks.iter().position(|t| &t.id == id) else {
            log::debug!("Ignoring mixer update for unknown track '{}'", id);
            return false;
        };

        let mut next = self.snapshot().clone();
        let mut track = self.tracks[position].clone();
        let mix = next.0[position];
        track.volume = mix.volume;
        track.gain = mix.gain;
        track.is_muted = mix.is_muted;
        track.is_soloed = mix.is_soloed;
        track.apply(update);
        next.0[position] = TrackMix::from(&track);

        self.snapshots.truncate(self.index + 1);
        self.snapshots.push(next);
        self.index = self.snapshots.len() - 1;

        if let Some(limit) = self.limit {
            if self.snapshots.len() > limit {
                let excess = self.snapshots.len() - limit;
                self.snapshots.drain(..excess);
                self.index -= excess;
            }
        }
        true
    }

    pub fn toggle_mute(&mut self, id: &TrackId) -> bool {
        match self.mix_of(id) {
            Some(mix) => self.apply(id, &TrackUpdate::muted(!mix.is_muted)),
            None => false,
        }
    }

    pub fn toggle_solo(&mut self, id: &TrackId) -> bool {
        match self.mix_of(id) {
            Some(mix) => self.apply(id, &TrackUpdate::soloed(!mix.is_soloed)),
            None => false,
        }
    }

    /// Move a fader by `delta`, clamped to 0..=1
    pub fn nudge_volume(&mut self, id: &TrackId, delta: f32) -> bool {
        match self.mix_of(id) {
            Some(mix) => self.apply(id, &TrackUpdate::volume(mix.volume + delta)),
            None => false,
        }
    }

    fn mix_of(&self, id: &TrackId) -> Option<TrackMix> {
        let position = self.tracks.iter().position(|t| &t.id == id)?;
        self.snapshot().0.get(position).copied()
    }

    pub fn undo(&mut self) -> bool {
        if self.can_undo() {
            self.index -= 1;
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.can_redo() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.snapshots.len()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for MixerHistory {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_tracks() -> Vec<Track> {
        vec![
            Track::new("drums", "Drums", "d.wav").with_volume(0.8),
            Track::new("bass", "Bass", "b.wav").with_volume(0.6),
        ]
    }

    fn id(s: &str) -> TrackId {
        TrackId::from(s)
    }

    #[test]
    fn test_fresh_history_has_nothing_to_undo() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.undo());
        assert!(!history.redo());
        assert_eq!(history.current_tracks(), song_tracks());
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());
        let before = history.snapshot().clone();

        assert!(history.apply(&id("bass"), &TrackUpdate::volume(0.25)));
        let after = history.snapshot().clone();
        assert_ne!(before, after);

        assert!(history.undo());
        assert_eq!(history.snapshot(), &before);
        assert!(history.redo());
        assert_eq!(history.snapshot(), &after);
        assert_eq!(history.current_tracks()[1].volume, 0.25);
    }

    #[test]
    fn test_edit_after_undo_discards_redo_tail() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());
        history.apply(&id("drums"), &TrackUpdate::muted(true));
        history.apply(&id("drums"), &TrackUpdate::volume(0.1));
        history.undo();
        assert!(history.can_redo());

        history.apply(&id("bass"), &TrackUpdate::soloed(true));
        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);

        let tracks = history.current_tracks();
        assert!(tracks[0].is_muted);
        assert_eq!(tracks[0].volume, 0.8);
        assert!(tracks[1].is_soloed);
    }

    #[test]
    fn test_unknown_track_is_ignored() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());
        assert!(!history.apply(&id("vox"), &TrackUpdate::volume(0.1)));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_reset_clears_previous_song() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());
        history.apply(&id("drums"), &TrackUpdate::volume(0.1));

        let next = vec![Track::new("pad", "Pad", "p.wav")];
        history.reset(&next);
        assert!(!history.can_undo());
        assert_eq!(history.current_tracks(), next);
    }

    #[test]
    fn test_helpers_each_record_one_entry() {
        let mut history = MixerHistory::default();
        history.reset(&song_tracks());

        assert!(history.toggle_mute(&id("drums")));
        assert!(history.toggle_solo(&id("bass")));
        assert!(history.nudge_volume(&id("bass"), 0.5));
        assert_eq!(history.len(), 4);

        let tracks = history.current_tracks();
        assert!(tracks[0].is_muted);
        assert!(tracks[1].is_soloed);
        assert_eq!(tracks[1].volume, 1.0);

        history.toggle_mute(&id("drums"));
        assert!(!history.current_tracks()[0].is_muted);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = MixerHistory::new(Some(3));
        history.reset(&song_tracks());
        for v in [0.1, 0.2, 0.3, 0.4] {
            history.apply(&id("drums"), &TrackUpdate::volume(v));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.current_tracks()[0].volume, 0.4);

        assert!(history.undo());
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(history.current_tracks()[0].volume, 0.2);
        assert!(history.redo());
        assert_eq!(history.current_tracks()[0].volume, 0.3);
    }
}
