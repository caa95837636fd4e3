//! Transport - the playback clock
//!
//! Position is pure arithmetic over an [`EngineClock`]:
//!
//! ```text
//! playing: current = start_offset + (clock.now() - engine_start)
//! paused:  current = start_offset
//! ```
//!
//! The transport never asks the render thread where it is. Every start
//! (play, seek, loop wrap) sends one [`VoiceBatch`] in which all voices
//! begin at the same offset, and the batch carries `engine_start` so the
//! render side can line its audible position up with this arithmetic.
//! Calls from a state that does not allow them are silent no-ops.

use std::sync::Arc;

use basedrop::Shared;

use super::clock::EngineClock;
use super::command::VoiceBatch;
use super::loop_region::LoopController;
use super::mixer::MixNode;
use super::voice::Voice;
use crate::audio_file::LoadedBuffer;
use crate::song::TrackId;

/// Transport lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No buffers ready
    #[default]
    Idle,
    /// A load cycle is in flight
    Loading,
    /// Paused with a known position
    Ready,
    Playing,
    /// Load failed fatally or audio is unavailable
    Error,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Loading => "loading",
            TransportState::Ready => "ready",
            TransportState::Playing => "playing",
            TransportState::Error => "error",
        }
    }
}

/// Where the render side receives voice batches
///
/// Implemented by the audio backend's command sender; [`NullSink`] discards
/// everything so the transport can run without a device.
pub trait PlaybackSink: Send {
    /// Replace all playing track voices with `batch`
    fn start(&mut self, batch: VoiceBatch);
    /// Silence all track voices
    fn stop(&mut self);
    /// Add a looping pad voice that fades in over `fade_in` seconds
    fn start_pad(&mut self, voice: Voice, fade_in: f64);
    /// Fade every pad voice out over `seconds`
    fn release_pad(&mut self, seconds: f64);
    /// Retry anything an earlier call could not deliver
    fn flush(&mut self) {}
}

/// Sink for running without an audio device
#[derive(Debug, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn start(&mut self, _batch: VoiceBatch) {}
    fn stop(&mut self) {}
    fn start_pad(&mut self, _voice: Voice, _fade_in: f64) {}
    fn release_pad(&mut self, _seconds: f64) {}
}

/// One loaded track ready to be voiced
#[derive(Clone)]
pub struct PlaybackSource {
    pub track: TrackId,
    pub buffer: Shared<LoadedBuffer>,
    pub node: Arc<MixNode>,
}

/// Result of one position tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Not playing; nothing published
    Idle,
    /// Current position while playing
    Position(f64),
    /// The loop end was crossed and playback jumped back to `to`
    Looped { to: f64 },
    /// Playback reached the end and rewound to 0
    Ended,
}

pub struct Transport {
    clock: Arc<dyn EngineClock>,
    sink: Box<dyn PlaybackSink>,
    state: TransportState,
    duration: f64,
    current_time: f64,
    start_offset: f64,
    engine_start: f64,
    sources: Vec<PlaybackSource>,
}

impl Transport {
    pub fn new(clock: Arc<dyn EngineClock>, sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            clock,
            sink,
            state: TransportState::Idle,
            duration: 0.0,
            current_time: 0.0,
            start_offset: 0.0,
            engine_start: 0.0,
            sources: Vec::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Offset at which the current (or next) segment starts
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Clock reading at which the current segment started
    pub fn engine_start(&self) -> f64 {
        self.engine_start
    }

    /// Tracks that will be voiced on play
    pub fn sources(&self) -> &[PlaybackSource] {
        &self.sources
    }

    /// Sink shared with the pad engine
    pub fn sink_mut(&mut self) -> &mut dyn PlaybackSink {
        self.sink.as_mut()
    }

    pub fn clock(&self) -> &Arc<dyn EngineClock> {
        &self.clock
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            log::debug!("Transport {} -> {}", self.state.as_str(), state.as_str());
            self.state = state;
        }
    }

    fn rewind(&mut self) {
        self.start_offset = 0.0;
        self.current_time = 0.0;
    }

    /// Drop the current sources and wait for a load cycle
    pub fn set_loading(&mut self) {
        self.halt();
        self.sources.clear();
        self.duration = 0.0;
        self.rewind();
        self.set_state(TransportState::Loading);
    }

    /// Install freshly loaded sources; the transport becomes `Ready` at 0
    pub fn arm(&mut self, sources: Vec<PlaybackSource>, duration: f64) {
        self.halt();
        self.sources = sources;
        self.duration = duration.max(0.0);
        self.rewind();
        self.set_state(TransportState::Ready);
    }

    /// Enter the error state; nothing plays until the next load
    pub fn fail(&mut self) {
        self.halt();
        self.sources.clear();
        self.duration = 0.0;
        self.rewind();
        self.set_state(TransportState::Error);
    }

    /// No track set at all
    pub fn reset_idle(&mut self) {
        self.halt();
        self.sources.clear();
        self.duration = 0.0;
        self.rewind();
        self.set_state(TransportState::Idle);
    }

    fn halt(&mut self) {
        if self.is_playing() {
            self.sink.stop();
        }
    }

    fn start_segment(&mut self) {
        self.engine_start = self.clock.now();
        let voices = self
            .sources
            .iter()
            .map(|s| Voice::new(s.buffer.clone(), Arc::clone(&s.node), self.start_offset))
            .collect();
        self.sink.start(VoiceBatch::new(voices, self.engine_start));
    }

    /// Start every loaded track at the current offset; only from `Ready`
    pub fn play(&mut self) -> bool {
        if self.state != TransportState::Ready {
            return false;
        }
        if self.current_time >= self.duration {
            self.rewind();
        }
        self.start_segment();
        self.set_state(TransportState::Playing);
        true
    }

    /// Stop all voices and fold elapsed time into the offset; only from `Playing`
    pub fn pause(&mut self) -> bool {
        if self.state != TransportState::Playing {
            return false;
        }
        self.sink.stop();
        let elapsed = self.clock.now() - self.engine_start;
        self.start_offset = (self.start_offset + elapsed).min(self.duration);
        self.current_time = self.start_offset;
        self.set_state(TransportState::Ready);
        true
    }

    /// Pause if playing, then return to 0
    pub fn stop(&mut self) {
        self.pause();
        self.rewind();
    }

    /// Jump to `time`, clamped to the track length
    ///
    /// While playing, the old voices are replaced by a new batch in a single
    /// command, so no block ever mixes old and new positions. Ignored unless
    /// the transport is `Ready` or `Playing`.
    pub fn seek(&mut self, time: f64) {
        let time = if time.is_finite() { time } else { 0.0 };
        let time = time.clamp(0.0, self.duration);
        match self.state {
            TransportState::Playing => {
                self.start_offset = time;
                self.current_time = time;
                self.start_segment();
            }
            TransportState::Ready => {
                self.start_offset = time;
                self.current_time = time;
            }
            _ => {}
        }
    }

    /// Current position in seconds, always within `[0, duration]`
    pub fn position(&self) -> f64 {
        if self.is_playing() {
            let elapsed = self.clock.now() - self.engine_start;
            (self.start_offset + elapsed).clamp(0.0, self.duration)
        } else {
            self.current_time
        }
    }

    /// Recompute the published position; apply loop wrap and natural end
    ///
    /// Loop takes precedence over the end of the song.
    pub fn tick(&mut self, loop_controller: &LoopController) -> TickOutcome {
        if !self.is_playing() {
            return TickOutcome::Idle;
        }

        let raw = self.start_offset + (self.clock.now() - self.engine_start);

        if let Some(target) = loop_controller.wrap_target(raw) {
            self.seek(target);
            return TickOutcome::Looped { to: self.current_time };
        }

        if raw >= self.duration {
            self.sink.stop();
            self.rewind();
            self.set_state(TransportState::Ready);
            return TickOutcome::Ended;
        }

        self.current_time = raw.max(0.0);
        TickOutcome::Position(self.current_time)
    }

    /// Last published position (not recomputed)
    pub fn current_time(&self) -> f64 {
        self.current_time
    }
}


#[cfg(test)]
mod tests {
    use super::test_sink::{RecordingSink, SinkEvent};
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::gc::gc_handle;
    use crate::engine::loop_region::LoopUpdate;
    use crate::types::{StereoBuffer, StereoSample};

    const EPS: f64 = 1e-9;

    fn source(id: &str, seconds: f64) -> PlaybackSource {
        let frames = (seconds * 100.0) as usize;
        let samples = StereoBuffer::from_vec(vec![StereoSample::mono(0.1); frames]);
        PlaybackSource {
            track: TrackId::from(id),
            buffer: Shared::new(&gc_handle(), LoadedBuffer::new(samples, 100)),
            node: Arc::new(MixNode::new(1.0, 1.0)),
        }
    }

    fn armed(duration: f64) -> (Transport, Arc<ManualClock>, RecordingSink) {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut transport = Transport::new(clock.clone(), Box::new(sink.clone()));
        transport.arm(vec![source("a", duration), source("b", duration - 1.0)], duration);
        (transport, clock, sink)
    }

    #[test]
    fn test_play_pause_accumulates_elapsed() {
        let (mut transport, clock, _) = armed(10.0);
        assert!(transport.play());
        clock.advance(2.0);
        assert!(transport.pause());
        assert!((transport.position() - 2.0).abs() < EPS);

        assert!(transport.play());
        clock.advance(1.0);
        assert!((transport.position() - 3.0).abs() < EPS);
        assert_eq!(transport.tick(&LoopController::new()), TickOutcome::Position(3.0));
    }

    #[test]
    fn test_invalid_calls_are_noops() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut transport = Transport::new(clock, Box::new(sink.clone()));
        assert!(!transport.play());
        assert!(!transport.pause());
        transport.seek(3.0);
        assert_eq!(transport.position(), 0.0);
        assert_eq!(transport.state(), TransportState::Idle);

        transport.set_loading();
        assert!(!transport.play());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_double_pause_is_harmless() {
        let (mut transport, clock, sink) = armed(10.0);
        transport.play();
        clock.advance(1.5);
        assert!(transport.pause());
        clock.advance(5.0);
        assert!(!transport.pause());
        assert!((transport.position() - 1.5).abs() < EPS);
        assert_eq!(sink.events().iter().filter(|e| **e == SinkEvent::Stop).count(), 1);
    }

    #[test]
    fn test_seek_while_playing_restarts_all_tracks_aligned() {
        let (mut transport, clock, sink) = armed(10.0);
        transport.play();
        clock.advance(1.0);
        transport.seek(6.5);

        assert!((transport.position() - 6.5).abs() < EPS);
        let (offsets, engine_start) = sink.last_start().unwrap();
        assert_eq!(offsets.len(), 2);
        assert!(offsets.iter().all(|o| (o - 6.5).abs() < EPS));
        assert_eq!(engine_start, 1.0);
        // Replacement is one start command, not stop + start
        assert_eq!(sink.events().iter().filter(|e| **e == SinkEvent::Stop).count(), 0);
        assert!(transport.is_playing());
    }

    #[test]
    fn test_seek_clamps() {
        let (mut transport, _, _) = armed(10.0);
        transport.seek(-4.0);
        assert_eq!(transport.position(), 0.0);
        transport.seek(99.0);
        assert_eq!(transport.position(), 10.0);
        transport.seek(f64::NAN);
        assert_eq!(transport.position(), 0.0);
    }

    #[test]
    fn test_loop_wrap_reports_start() {
        let (mut transport, clock, sink) = armed(10.0);
        let mut loop_controller = LoopController::new();
        loop_controller.update(LoopUpdate { start: Some(2.0), end: Some(5.0), enabled: Some(true) });

        transport.play();
        clock.advance(4.0);
        assert_eq!(transport.tick(&loop_controller), TickOutcome::Position(4.0));
        clock.advance(1.0);
        assert_eq!(transport.tick(&loop_controller), TickOutcome::Looped { to: 2.0 });
        assert!((transport.position() - 2.0).abs() < EPS);

        let (offsets, _) = sink.last_start().unwrap();
        assert!(offsets.iter().all(|o| (o - 2.0).abs() < EPS));
    }

    #[test]
    fn test_natural_end_rewinds() {
        let (mut transport, clock, sink) = armed(10.0);
        transport.seek(9.0);
        transport.play();
        clock.advance(1.5);
        assert_eq!(transport.tick(&LoopController::new()), TickOutcome::Ended);
        assert_eq!(transport.state(), TransportState::Ready);
        assert_eq!(transport.position(), 0.0);
        assert_eq!(sink.events().last(), Some(&SinkEvent::Stop));
    }

    #[test]
    fn test_play_at_end_replays_from_start() {
        let (mut transport, clock, sink) = armed(10.0);
        transport.seek(10.0);
        assert!(transport.play());
        let (offsets, _) = sink.last_start().unwrap();
        assert!(offsets.iter().all(|o| o.abs() < EPS));
        clock.advance(0.5);
        assert!((transport.position() - 0.5).abs() < EPS);
    }

    #[test]
    fn test_pause_never_exceeds_duration() {
        let (mut transport, clock, _) = armed(10.0);
        transport.play();
        clock.advance(25.0);
        assert_eq!(transport.position(), 10.0);
        transport.pause();
        assert_eq!(transport.position(), 10.0);
    }

    #[test]
    fn test_stop_rewinds() {
        let (mut transport, clock, _) = armed(10.0);
        transport.play();
        clock.advance(3.0);
        transport.stop();
        assert_eq!(transport.state(), TransportState::Ready);
        assert_eq!(transport.position(), 0.0);
    }

    #[test]
    fn test_fail_stops_playback() {
        let (mut transport, _, sink) = armed(10.0);
        transport.play();
        transport.fail();
        assert_eq!(transport.state(), TransportState::Error);
        assert!(!transport.play());
        assert_eq!(sink.events().last(), Some(&SinkEvent::Stop));
    }
}
