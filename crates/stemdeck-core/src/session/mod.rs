//! Playback session - one active song and everything that plays it
//!
//! [`Session`] owns the loader, transport, mix graph, mixer history, loop
//! controller and (optionally) the ambient pad, and is the only thing the
//! player talks to. It is driven by [`Ticker`] on a fixed interval and
//! publishes a [`PlaybackStatus`] each time.
//!
//! ```ignore
//! let session = Arc::new(Mutex::new(Session::new(config, source, clock, sink)));
//! session.lock()?.load_song(&song)?;
//! let ticker = Ticker::spawn(session.clone(), config.tick_interval(), status_tx)?;
//! ```

mod status;
mod ticker;

pub use status::{format_time, PlaybackError, PlaybackStatus};
pub use ticker::Ticker;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{
    AmbientPadEngine, EngineClock, LoopController, LoopRegion, LoopUpdate, MixGraph, MixerHistory, NullSink,
    PadConfig, PadError, PlaybackSink, PlaybackSource, SystemClock, TickOutcome, Transport, TransportState,
};
use crate::loader::{AssetLoader, AssetSource, LoadOutcome, LoaderConfig};
use crate::music::MusicalKey;
use crate::song::{first_duplicate, Song, Track, TrackId, TrackUpdate};

/// Session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Position publish interval (16 ms is roughly display refresh)
    pub tick_interval_ms: u64,
    /// Mixer snapshots kept for undo; `None` keeps everything
    pub history_limit: Option<usize>,
    pub loader: LoaderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            history_limit: Some(512),
            loader: LoaderConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

pub struct Session {
    source: Arc<dyn AssetSource>,
    loader: AssetLoader,
    transport: Transport,
    graph: MixGraph,
    history: MixerHistory,
    loop_controller: LoopController,
    pad: Option<AmbientPadEngine>,
    song: Option<Song>,
    error: Option<PlaybackError>,
    /// Set once when the audio device could not be opened
    audio_unavailable: Option<String>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        source: Arc<dyn AssetSource>,
        clock: Arc<dyn EngineClock>,
        sink: Box<dyn PlaybackSink>,
    ) -> Self {
        Self {
            loader: AssetLoader::new(Arc::clone(&source), config.loader.clone()),
            source,
            transport: Transport::new(clock, sink),
            graph: MixGraph::new(),
            history: MixerHistory::new(config.history_limit),
            loop_controller: LoopController::new(),
            pad: None,
            song: None,
            error: None,
            audio_unavailable: None,
        }
    }

    /// A session whose audio output could not be opened
    ///
    /// Mixer edits still work; every playback operation is a no-op and the
    /// status reports [`PlaybackError::PlatformAudioUnavailable`].
    pub fn without_audio(config: SessionConfig, source: Arc<dyn AssetSource>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log::warn!("Running without audio output: {}", reason);
        let mut session = Self::new(config, source, Arc::new(SystemClock::new()), Box::new(NullSink));
        session.transport.fail();
        session.error = Some(PlaybackError::PlatformAudioUnavailable(reason.clone()));
        session.audio_unavailable = Some(reason);
        session
    }

    pub fn has_audio(&self) -> bool {
        self.audio_unavailable.is_none()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Song loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Make `song` the active song and start loading its tracks
    ///
    /// Stops playback, resets the mixer history to the song's initial track
    /// states, rebuilds the mix graph, and supersedes any load in flight.
    /// A song with duplicate track ids is refused and nothing changes.
    pub fn load_song(&mut self, song: &Song) -> Result<(), PlaybackError> {
        reject_duplicates(&song.tracks)?;
        log::info!("Activating song {} '{}' ({} tracks)", song.id, song.title, song.tracks.len());
        self.song = Some(song.clone());
        self.activate(&song.tracks);
        Ok(())
    }

    /// Load a bare track set (no song metadata)
    pub fn load_tracks(&mut self, tracks: &[Track]) -> Result<(), PlaybackError> {
        reject_duplicates(tracks)?;
        self.song = None;
        self.activate(tracks);
        Ok(())
    }

    fn activate(&mut self, tracks: &[Track]) {
        self.transport.stop();
        self.history.reset(tracks);
        self.graph.rebuild(tracks);
        self.loop_controller.reset_for_duration(0.0);

        if let Some(reason) = &self.audio_unavailable {
            self.error = Some(PlaybackError::PlatformAudioUnavailable(reason.clone()));
            self.loader.cancel();
            return;
        }

        self.error = None;
        self.loader.begin(tracks);
        if tracks.is_empty() {
            self.transport.reset_idle();
        } else {
            self.transport.set_loading();
        }
    }

    /// Apply any finished load work; returns the outcome once, when it settles
    pub fn poll_load(&mut self) -> Option<LoadOutcome> {
        let outcome = self.loader.poll()?;
        self.settle(&outcome);
        Some(outcome)
    }

    /// Block until the current load settles or `timeout` passes
    pub fn wait_for_load(&mut self, timeout: Duration) -> Option<LoadOutcome> {
        let outcome = self.loader.wait(timeout)?;
        self.settle(&outcome);
        Some(outcome)
    }

    fn settle(&mut self, outcome: &LoadOutcome) {
        match outcome {
            LoadOutcome::Ready { duration } => {
                // Track order, not completion order
                let sources: Vec<PlaybackSource> = self
                    .history
                    .track_ids()
                    .filter_map(|id| {
                        let buffer = self.loader.buffer(id)?;
                        let node = self.graph.node(id)?;
                        Some(PlaybackSource {
                            track: id.clone(),
                            buffer: buffer.clone(),
                            node: Arc::clone(node),
                        })
                    })
                    .collect();
                self.transport.arm(sources, *duration);
                self.loop_controller.reset_for_duration(*duration);
            }
            LoadOutcome::Failed(err) => {
                self.transport.fail();
                self.error = Some(PlaybackError::FatalLoad(err.clone()));
            }
        }
    }

    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ticking and status
    // ─────────────────────────────────────────────────────────────────────────

    /// One scheduler step: settle loads, advance the transport, start a
    /// pending pad voice, then report
    pub fn tick(&mut self) -> PlaybackStatus {
        self.transport.sink_mut().flush();
        self.poll_load();

        match self.transport.tick(&self.loop_controller) {
            TickOutcome::Looped { to } => log::debug!("Loop wrapped to {:.3}s", to),
            TickOutcome::Ended => log::info!("Reached end of song"),
            TickOutcome::Position(_) | TickOutcome::Idle => {}
        }

        if let Some(pad) = self.pad.as_mut() {
            pad.tick(self.transport.sink_mut());
        }

        self.status()
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            current_time: self.transport.position(),
            duration: self.transport.duration(),
            loop_region: self.loop_controller.region(),
            loading_progress: self.loader.progress().clone(),
            track_load_errors: self.loader.errors().clone(),
            is_playing: self.transport.is_playing(),
            state: self.transport.state(),
            error: self.error.clone(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn current_time(&self) -> f64 {
        self.transport.position()
    }

    pub fn duration(&self) -> f64 {
        self.transport.duration()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    pub fn play(&mut self) -> bool {
        self.has_audio() && self.transport.play()
    }

    pub fn pause(&mut self) -> bool {
        self.has_audio() && self.transport.pause()
    }

    /// Play or pause; at the end of the song, replay from the start
    pub fn toggle_play(&mut self) -> bool {
        if !self.has_audio() {
            return false;
        }
        if self.transport.is_playing() {
            return self.transport.pause();
        }
        if self.transport.position() >= self.transport.duration() {
            self.transport.stop();
        }
        self.transport.play()
    }

    pub fn stop(&mut self) {
        if self.has_audio() {
            self.transport.stop();
        }
    }

    pub fn seek(&mut self, time: f64) {
        if self.has_audio() {
            self.transport.seek(time);
        }
    }

    /// Merge a partial loop update into the loop region
    pub fn update_loop(&mut self, update: LoopUpdate) {
        self.loop_controller.update(update);
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_controller.region()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mixer
    // ─────────────────────────────────────────────────────────────────────────

    /// Live track states (current mixer snapshot applied)
    pub fn current_tracks(&self) -> Vec<Track> {
        self.history.current_tracks()
    }

    /// Record a mixer edit and apply it to the live graph
    pub fn handle_track_update(&mut self, id: &TrackId, update: &TrackUpdate) -> bool {
        let changed = self.history.apply(id, update);
        self.sync_graph(changed)
    }

    pub fn toggle_mute(&mut self, id: &TrackId) -> bool {
        let changed = self.history.toggle_mute(id);
        self.sync_graph(changed)
    }

    pub fn toggle_solo(&mut self, id: &TrackId) -> bool {
        let changed = self.history.toggle_solo(id);
        self.sync_graph(changed)
    }

    pub fn nudge_volume(&mut self, id: &TrackId, delta: f32) -> bool {
        let changed = self.history.nudge_volume(id, delta);
        self.sync_graph(changed)
    }

    pub fn undo(&mut self) -> bool {
        let changed = self.history.undo();
        self.sync_graph(changed)
    }

    pub fn redo(&mut self) -> bool {
        let changed = self.history.redo();
        self.sync_graph(changed)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn sync_graph(&self, changed: bool) -> bool {
        if changed {
            self.graph.apply(&self.history.current_tracks());
        }
        changed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ambient pad
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach an ambient pad sharing this session's source and clock
    pub fn enable_pad(&mut self, config: PadConfig) -> Result<(), PadError> {
        let pad = AmbientPadEngine::new(config, Arc::clone(&self.source), Arc::clone(self.transport.clock()))?;
        self.pad = Some(pad);
        Ok(())
    }

    pub fn pad(&self) -> Option<&AmbientPadEngine> {
        self.pad.as_ref()
    }

    pub fn pad_power(&mut self, on: bool) -> Result<(), PadError> {
        if !self.has_audio() {
            return Ok(());
        }
        let pad = self.pad.as_mut().ok_or(PadError::NoSample)?;
        if on {
            pad.power_on()
        } else {
            pad.power_off(self.transport.sink_mut());
            Ok(())
        }
    }

    /// Press a pad key by name (`C`, `F#`, `Bb`, ...)
    pub fn pad_key(&mut self, key: &str) -> Result<bool, PadError> {
        let key = MusicalKey::parse(key).ok_or_else(|| PadError::UnknownKey(key.to_string()))?;
        if !self.has_audio() {
            return Ok(false);
        }
        let pad = self.pad.as_mut().ok_or(PadError::NoSample)?;
        Ok(pad.press_key(key, self.transport.sink_mut()))
    }

    pub fn pad_volume(&mut self, volume: f32) {
        if let Some(pad) = self.pad.as_mut() {
            pad.set_volume(volume);
        }
    }

    pub fn pad_mute(&mut self, muted: bool) {
        if let Some(pad) = self.pad.as_mut() {
            pad.set_muted(muted);
        }
    }
}

/// Two tracks sharing an id would share one mix node and one buffer
fn reject_duplicates(tracks: &[Track]) -> Result<(), PlaybackError> {
    match first_duplicate(tracks) {
        Some(id) => {
            log::warn!("Refusing track set with duplicate id '{}'", id);
            Err(PlaybackError::DuplicateTrack(id.clone()))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::test_util::wav_bytes;
    use crate::engine::test_sink::{RecordingSink, SinkEvent};
    use crate::engine::ManualClock;
    use crate::loader::{FetchError, MemorySource, SourceGate};
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(10);
    const EPS: f64 = 1e-9;

    struct Rig {
        session: Session,
        clock: Arc<ManualClock>,
        sink: RecordingSink,
        memory: Arc<MemorySource>,
    }

    fn rig() -> Rig {
        let memory = Arc::new(MemorySource::new());
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let session = Session::new(
            SessionConfig::default(),
            memory.clone(),
            clock.clone(),
            Box::new(sink.clone()),
        );
        Rig { session, clock, sink, memory }
    }

    fn track(id: &str) -> Track {
        Track::new(id, id, format!("mem://{}", id))
    }

    fn id(s: &str) -> TrackId {
        TrackId::from(s)
    }

    /// Loads {drums 10s, bass 12s, keys 9s}
    fn loaded_rig() -> Rig {
        let mut rig = rig();
        rig.memory.insert("mem://drums", wav_bytes(10.0, 400, 1, 0.1));
        rig.memory.insert("mem://bass", wav_bytes(12.0, 400, 1, 0.1));
        rig.memory.insert("mem://keys", wav_bytes(9.0, 400, 1, 0.1));
        rig.session.load_tracks(&[track("drums"), track("bass"), track("keys")]).unwrap();
        assert_eq!(rig.session.state(), TransportState::Loading);
        rig.session.wait_for_load(WAIT).unwrap();
        rig
    }

    #[test]
    fn test_load_sets_duration_and_default_loop() {
        let rig = loaded_rig();
        let status = rig.session.status();
        assert!((status.duration - 12.0).abs() < 1e-6);
        assert_eq!(status.state, TransportState::Ready);
        assert_eq!(status.loop_region.start, 0.0);
        assert!((status.loop_region.end - 3.0).abs() < 1e-6);
        assert!(!status.loop_region.enabled);
        assert_eq!(status.loading_progress.overall(), 100.0);
        assert!(status.track_load_errors.is_empty());
    }

    #[test]
    fn test_failed_track_is_skipped_and_others_start_in_sync() {
        let mut rig = rig();
        rig.memory.insert("mem://drums", wav_bytes(4.0, 400, 1, 0.1));
        rig.memory.insert_failure("mem://bass", FetchError::NotFound("mem://bass".into()));
        rig.memory.insert("mem://keys", wav_bytes(3.0, 400, 1, 0.1));
        rig.session.load_tracks(&[track("drums"), track("bass"), track("keys")]).unwrap();
        rig.session.wait_for_load(WAIT).unwrap();

        let status = rig.session.status();
        let failed: Vec<_> = status.track_load_errors.keys().cloned().collect();
        assert_eq!(failed, vec![id("bass")]);

        assert!(rig.session.play());
        let (offsets, _) = rig.sink.last_start().unwrap();
        assert_eq!(offsets, vec![0.0, 0.0]);
    }

    #[test]
    fn test_duplicate_track_ids_are_refused() {
        let mut rig = loaded_rig();
        let result = rig.session.load_tracks(&[track("drums"), track("vox"), track("drums")]);
        assert_eq!(result, Err(PlaybackError::DuplicateTrack(id("drums"))));

        // The previous song is untouched
        assert_eq!(rig.session.state(), TransportState::Ready);
        assert!((rig.session.duration() - 12.0).abs() < 1e-6);
        let ids: Vec<_> = rig.session.current_tracks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![id("drums"), id("bass"), id("keys")]);
        assert!(rig.session.play());
    }

    #[test]
    fn test_all_tracks_failing_blocks_playback() {
        let mut rig = rig();
        rig.session.load_tracks(&[track("missing-a"), track("missing-b")]).unwrap();
        rig.session.wait_for_load(WAIT).unwrap();

        let status = rig.session.status();
        assert_eq!(status.state, TransportState::Error);
        assert!(matches!(status.error, Some(PlaybackError::FatalLoad(_))));
        assert!(!rig.session.play());
    }

    #[test]
    fn test_play_pause_play_accumulates() {
        let mut rig = loaded_rig();
        assert!(rig.session.play());
        rig.clock.advance(2.0);
        assert!(rig.session.pause());
        assert!((rig.session.current_time() - 2.0).abs() < EPS);

        assert!(rig.session.play());
        rig.clock.advance(1.0);
        let status = rig.session.tick();
        assert!((status.current_time - 3.0).abs() < EPS);
        assert!(status.is_playing);
    }

    #[test]
    fn test_loop_wrap_on_tick() {
        let mut rig = loaded_rig();
        rig.session.update_loop(LoopUpdate { start: Some(2.0), end: Some(5.0), enabled: Some(true) });
        rig.session.play();
        rig.clock.advance(5.0);

        let status = rig.session.tick();
        assert!((status.current_time - 2.0).abs() < EPS);
        let (offsets, _) = rig.sink.last_start().unwrap();
        assert!(offsets.iter().all(|o| (o - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_seek_while_playing_reads_back() {
        let mut rig = loaded_rig();
        rig.session.play();
        rig.clock.advance(1.0);
        rig.session.seek(7.25);
        assert!((rig.session.current_time() - 7.25).abs() < EPS);

        let (offsets, _) = rig.sink.last_start().unwrap();
        assert_eq!(offsets.len(), 3);
        assert!(offsets.iter().all(|o| (o - 7.25).abs() < 1e-6));
    }

    #[test]
    fn test_toggle_at_end_replays() {
        let mut rig = loaded_rig();
        rig.session.seek(12.0);
        assert!(rig.session.toggle_play());
        assert!((rig.session.current_time()).abs() < EPS);
        assert!(rig.session.toggle_play());
        assert_eq!(rig.session.state(), TransportState::Ready);
    }

    #[test]
    fn test_switching_song_mid_load_keeps_only_new_song() {
        let mut rig = rig();
        let gate = SourceGate::new();
        rig.memory.insert_gated("mem://old", wav_bytes(1.0, 400, 1, 0.1), gate.clone());
        rig.memory.insert("mem://new", wav_bytes(2.0, 400, 1, 0.1));

        rig.session.load_tracks(&[track("old")]).unwrap();
        rig.session.load_tracks(&[track("new")]).unwrap();
        rig.session.wait_for_load(WAIT).unwrap();

        gate.release();
        std::thread::sleep(Duration::from_millis(100));
        rig.session.tick();

        let ids: Vec<_> = rig.session.current_tracks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![id("new")]);
        let sources: Vec<_> = rig.session.transport.sources().iter().map(|s| s.track.clone()).collect();
        assert_eq!(sources, vec![id("new")]);
        assert!((rig.session.duration() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_song_switch_stops_playback() {
        let mut rig = loaded_rig();
        rig.session.play();
        rig.clock.advance(1.0);
        rig.session.load_tracks(&[track("drums")]).unwrap();
        assert_eq!(rig.session.current_time(), 0.0);
        assert!(rig.sink.events().contains(&SinkEvent::Stop));
        assert_eq!(rig.session.state(), TransportState::Loading);
    }

    #[test]
    fn test_empty_song_is_idle() {
        let mut rig = rig();
        rig.session.load_tracks(&[]).unwrap();
        let status = rig.session.status();
        assert_eq!(status.state, TransportState::Idle);
        assert_eq!(status.duration, 0.0);
        assert_eq!(status.loading_progress.overall(), 0.0);
    }

    #[test]
    fn test_mixer_edits_reach_live_nodes_and_undo() {
        let mut rig = loaded_rig();
        let drums = id("drums");
        assert!(rig.session.handle_track_update(&drums, &TrackUpdate::volume(0.3)));
        assert_eq!(rig.session.graph.node(&drums).unwrap().level(), 0.3);

        assert!(rig.session.toggle_solo(&id("bass")));
        assert_eq!(rig.session.graph.node(&drums).unwrap().level(), 0.0);

        assert!(rig.session.undo());
        assert_eq!(rig.session.graph.node(&drums).unwrap().level(), 0.3);
        assert!(rig.session.can_redo());

        assert!(rig.session.toggle_mute(&drums));
        assert!(!rig.session.can_redo());
        assert_eq!(rig.session.graph.node(&drums).unwrap().level(), 0.0);

        assert!(!rig.session.handle_track_update(&id("nope"), &TrackUpdate::volume(1.0)));
    }

    #[test]
    fn test_without_audio_everything_is_noop() {
        let memory = Arc::new(MemorySource::new());
        memory.insert("mem://drums", wav_bytes(1.0, 400, 1, 0.1));
        let mut session = Session::without_audio(SessionConfig::default(), memory, "no device");
        session.load_tracks(&[track("drums")]).unwrap();

        assert!(!session.play());
        assert!(!session.toggle_play());
        session.seek(0.5);
        assert_eq!(session.current_time(), 0.0);
        assert_eq!(session.state(), TransportState::Error);
        assert!(matches!(
            session.status().error,
            Some(PlaybackError::PlatformAudioUnavailable(_))
        ));

        // Mixer state stays editable
        assert!(session.nudge_volume(&id("drums"), -0.1));
        assert!((session.current_tracks()[0].volume - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_pad_through_session() {
        let mut rig = rig();
        rig.memory.insert("mem://pad.wav", wav_bytes(0.5, 400, 1, 0.2));
        assert_eq!(rig.session.pad_power(true), Err(PadError::NoSample));

        rig.session
            .enable_pad(PadConfig {
                sample: Some("mem://pad.wav".into()),
                ..Default::default()
            })
            .unwrap();
        rig.session.pad_power(true).unwrap();
        assert_eq!(rig.session.pad_key("D"), Ok(true));
        assert!(matches!(rig.session.pad_key("X"), Err(PadError::UnknownKey(_))));

        rig.session.pad_key("E").unwrap();
        rig.clock.advance(0.5);
        rig.session.tick();
        let starts = rig
            .sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::PadStart { .. }))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_ticker_publishes_and_stops() {
        let rig = loaded_rig();
        let session = Arc::new(Mutex::new(rig.session));
        let (tx, rx) = crossbeam::channel::bounded(4);

        let mut ticker = Ticker::spawn(Arc::clone(&session), Duration::from_millis(5), tx).unwrap();
        let status = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(status.state, TransportState::Ready);
        assert!(ticker.is_running());

        ticker.stop();
        assert!(!ticker.is_running());
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err());
    }
}
