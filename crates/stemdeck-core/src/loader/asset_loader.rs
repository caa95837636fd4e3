//! Concurrent per-track fetch and decode
//!
//! Every load cycle spawns one worker thread per track. Workers stream their
//! source in chunks, report progress, decode, and send the result back over a
//! channel tagged with the cycle's generation. The owner drains the channel
//! with [`AssetLoader::poll`]; results from a superseded generation are
//! discarded there, and workers themselves abort between chunks once they
//! notice their generation is stale.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use basedrop::Shared;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::progress::LoadProgress;
use super::source::{extension_hint, AssetSource, AssetStream, FetchError};
use crate::audio_file::{self, DecodeError, LoadedBuffer};
use crate::engine::gc::gc_handle;
use crate::song::{Track, TrackId};

/// Default streaming chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on what a declared content length may reserve up front
const MAX_PREALLOC_BYTES: u64 = 64 * 1024 * 1024;

/// Loader tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Bytes read per chunk; progress is reported once per chunk
    pub chunk_size: usize,
    /// Request timeout for HTTP sources
    pub http_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            http_timeout_secs: 30,
        }
    }
}

/// One track failed to load; its siblings are unaffected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackLoadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("loader worker failed: {0}")]
    Worker(String),
}

/// Every requested track of a cycle failed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("all {failed} tracks failed to load")]
pub struct FatalLoadError {
    pub failed: usize,
}

/// How a settled load cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// At least one track decoded; duration is the longest of them
    Ready { duration: f64 },
    Failed(FatalLoadError),
}

enum LoadEvent {
    Progress {
        generation: u64,
        track: TrackId,
        percent: f32,
    },
    Finished {
        generation: u64,
        track: TrackId,
        result: Result<Shared<LoadedBuffer>, TrackLoadError>,
    },
}

impl LoadEvent {
    fn generation(&self) -> u64 {
        match self {
            LoadEvent::Progress { generation, .. } | LoadEvent::Finished { generation, .. } => *generation,
        }
    }
}

struct LoadCycle {
    generation: u64,
    requested: usize,
    pending: usize,
}

/// Fetches and decodes a song's track set
///
/// Owns the buffer map exclusively. A new [`begin`](Self::begin) replaces the
/// previous cycle outright: its buffers, errors and progress are dropped at
/// once, and any late result it produces is ignored.
pub struct AssetLoader {
    source: Arc<dyn AssetSource>,
    config: LoaderConfig,
    generation: Arc<AtomicU64>,
    events_tx: Sender<LoadEvent>,
    events_rx: Receiver<LoadEvent>,
    cycle: Option<LoadCycle>,
    buffers: HashMap<TrackId, Shared<LoadedBuffer>>,
    errors: BTreeMap<TrackId, TrackLoadError>,
    progress: LoadProgress,
    outcome: Option<LoadOutcome>,
}

impl AssetLoader {
    pub fn new(source: Arc<dyn AssetSource>, config: LoaderConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            source,
            config,
            generation: Arc::new(AtomicU64::new(0)),
            events_tx,
            events_rx,
            cycle: None,
            buffers: HashMap::new(),
            errors: BTreeMap::new(),
            progress: LoadProgress::default(),
            outcome: None,
        }
    }

    /// Current cycle generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new load cycle for `tracks`
    ///
    /// Supersedes any cycle in flight. An empty track set leaves the loader
    /// idle with no cycle.
    pub fn begin(&mut self, tracks: &[Track]) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        self.buffers.clear();
        self.errors.clear();
        self.outcome = None;
        self.progress = LoadProgress::new(tracks.iter().map(|t| &t.id));

        if tracks.is_empty() {
            self.cycle = None;
            log::debug!("Load cycle {} has no tracks, loader idle", generation);
            return generation;
        }

        log::info!("Starting load cycle {} for {} tracks", generation, tracks.len());

        self.cycle = Some(LoadCycle {
            generation,
            requested: tracks.len(),
            pending: tracks.len(),
        });

        for track in tracks {
            let job = LoadJob {
                track: track.id.clone(),
                locator: track.url.clone(),
                generation,
                current: Arc::clone(&self.generation),
                source: Arc::clone(&self.source),
                chunk_size: self.config.chunk_size.max(1),
                events: self.events_tx.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("track-loader-{}", track.id))
                .spawn(move || job.run());

            if let Err(e) = spawned {
                log::error!("Failed to spawn loader for track '{}': {}", track.id, e);
                // Goes through the channel like any other result
                let _ = self.events_tx.send(LoadEvent::Finished {
                    generation,
                    track: track.id.clone(),
                    result: Err(TrackLoadError::Worker(e.to_string())),
                });
            }
        }

        generation
    }

    /// Abandon the cycle in flight and drop all buffers
    pub fn cancel(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if self.cycle.take().is_some() {
            log::info!("Load cycle cancelled (now generation {})", generation);
        }
        self.buffers.clear();
        self.errors.clear();
        self.outcome = None;
        self.progress = LoadProgress::default();
    }

    /// True while a cycle has unsettled tracks
    pub fn is_loading(&self) -> bool {
        self.cycle.as_ref().map_or(false, |c| c.pending > 0)
    }

    /// Drain pending worker events without blocking
    ///
    /// Returns the outcome exactly once, on the call that settles the cycle.
    pub fn poll(&mut self) -> Option<LoadOutcome> {
        let mut settled = None;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(outcome) = self.handle_event(event) {
                settled = Some(outcome);
            }
        }
        settled
    }

    /// Block until the current cycle settles or `timeout` passes
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadOutcome> {
        let deadline = Instant::now() + timeout;
        if let Some(outcome) = self.poll() {
            return Some(outcome);
        }
        while self.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(outcome) = self.handle_event(event) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }

    fn handle_event(&mut self, event: LoadEvent) -> Option<LoadOutcome> {
        let current = match &self.cycle {
            Some(cycle) if cycle.generation == event.generation() => cycle.generation,
            _ => {
                log::debug!(
                    "Discarding stale loader event from generation {} (current {})",
                    event.generation(),
                    self.generation()
                );
                return None;
            }
        };

        match event {
            LoadEvent::Progress { track, percent, .. } => {
                self.progress.set(&track, percent);
                None
            }
            LoadEvent::Finished { track, result, .. } => {
                match result {
                    Ok(buffer) => {
                        log::info!(
                            "Track '{}' loaded ({:.2}s @ {}Hz)",
                            track,
                            buffer.duration(),
                            buffer.sample_rate()
                        );
                        self.progress.set(&track, 100.0);
                        self.buffers.insert(track, buffer);
                    }
                    Err(err) => {
                        log::warn!("Track '{}' failed to load: {}", track, err);
                        self.errors.insert(track, err);
                    }
                }

                let cycle = self.cycle.as_mut()?;
                cycle.pending = cycle.pending.saturating_sub(1);
                if cycle.pending > 0 {
                    return None;
                }
                let outcome = self.settle(current);
                self.outcome = Some(outcome.clone());
                Some(outcome)
            }
        }
    }

    fn settle(&mut self, generation: u64) -> LoadOutcome {
        let requested = self.cycle.as_ref().map_or(0, |c| c.requested);
        if self.buffers.is_empty() && requested > 0 {
            let err = FatalLoadError { failed: self.errors.len() };
            log::error!("Load cycle {} failed: {}", generation, err);
            return LoadOutcome::Failed(err);
        }

        let duration = self.buffers.values().map(|b| b.duration()).fold(0.0, f64::max);
        self.progress.complete();
        log::info!(
            "Load cycle {} ready: {} of {} tracks, duration {:.2}s",
            generation,
            self.buffers.len(),
            requested,
            duration
        );
        LoadOutcome::Ready { duration }
    }

    /// Decoded buffers of the current cycle, keyed by track id
    pub fn buffers(&self) -> &HashMap<TrackId, Shared<LoadedBuffer>> {
        &self.buffers
    }

    pub fn buffer(&self, id: &TrackId) -> Option<&Shared<LoadedBuffer>> {
        self.buffers.get(id)
    }

    /// Per-track failures of the current cycle
    pub fn errors(&self) -> &BTreeMap<TrackId, TrackLoadError> {
        &self.errors
    }

    pub fn progress(&self) -> &LoadProgress {
        &self.progress
    }

    /// Outcome of the current cycle once settled
    pub fn outcome(&self) -> Option<&LoadOutcome> {
        self.outcome.as_ref()
    }
}

/// Work item for one track's worker thread
struct LoadJob {
    track: TrackId,
    locator: String,
    generation: u64,
    current: Arc<AtomicU64>,
    source: Arc<dyn AssetSource>,
    chunk_size: usize,
    events: Sender<LoadEvent>,
}

impl LoadJob {
    fn is_stale(&self) -> bool {
        self.current.load(Ordering::Acquire) != self.generation
    }

    fn run(self) {
        if self.is_stale() {
            return;
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.load())) {
            Ok(Ok(Some(buffer))) => Ok(buffer),
            Ok(Ok(None)) => {
                log::debug!("Loader for '{}' aborted: generation {} superseded", self.track, self.generation);
                return;
            }
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Loader for '{}' panicked: {}", self.track, message);
                Err(TrackLoadError::Worker(format!("loader panicked: {}", message)))
            }
        };

        if self.is_stale() {
            log::debug!("Dropping result for '{}' from superseded generation {}", self.track, self.generation);
            return;
        }

        // Receiver gone means the loader itself was dropped
        let _ = self.events.send(LoadEvent::Finished {
            generation: self.generation,
            track: self.track.clone(),
            result: result.map(|buffer| Shared::new(&gc_handle(), buffer)),
        });
    }

    /// Fetch and decode; `Ok(None)` when the cycle was superseded mid-read
    fn load(&self) -> Result<Option<LoadedBuffer>, TrackLoadError> {
        load_buffer(self.source.as_ref(), &self.locator, self.chunk_size, |read, total| {
            if self.is_stale() {
                return false;
            }
            if let Some(total) = total.filter(|&t| t > 0) {
                let percent = (read as f64 / total as f64 * 100.0).min(100.0) as f32;
                let _ = self.events.send(LoadEvent::Progress {
                    generation: self.generation,
                    track: self.track.clone(),
                    percent,
                });
            }
            true
        })
    }
}

/// Open `locator`, read it whole and decode it
///
/// `on_chunk` runs after every read with the bytes read so far and the
/// declared length; returning false abandons the load with `Ok(None)`.
pub(crate) fn load_buffer(
    source: &dyn AssetSource,
    locator: &str,
    chunk_size: usize,
    on_chunk: impl FnMut(usize, Option<u64>) -> bool,
) -> Result<Option<LoadedBuffer>, TrackLoadError> {
    let stream = source.open(locator)?;
    let Some(bytes) = read_stream(stream, chunk_size, on_chunk)? else {
        return Ok(None);
    };
    let hint = extension_hint(locator);
    Ok(Some(audio_file::decode(bytes, hint.as_deref())?))
}

/// Read a stream to the end in `chunk_size` pieces
///
/// The declared length only sizes the initial reservation, capped at
/// [`MAX_PREALLOC_BYTES`]; the body decides how much is actually read.
fn read_stream(
    mut stream: AssetStream,
    chunk_size: usize,
    mut on_chunk: impl FnMut(usize, Option<u64>) -> bool,
) -> Result<Option<Vec<u8>>, FetchError> {
    let total = stream.content_length;
    let mut bytes = Vec::with_capacity(total.map_or(0, |t| t.min(MAX_PREALLOC_BYTES) as usize));
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        let n = match stream.reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        bytes.extend_from_slice(&chunk[..n]);
        if !on_chunk(bytes.len(), total) {
            return Ok(None);
        }
    }
    Ok(Some(bytes))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::test_util::wav_bytes;
    use crate::loader::source::{MemorySource, SourceGate};

    const WAIT: Duration = Duration::from_secs(10);

    /// Serves real audio but declares an absurd content length
    struct OversizedLengthSource {
        body: Vec<u8>,
    }

    impl AssetSource for OversizedLengthSource {
        fn open(&self, _locator: &str) -> Result<AssetStream, FetchError> {
            Ok(AssetStream::new(Some(u64::MAX), std::io::Cursor::new(self.body.clone())))
        }
    }

    /// Delegates to memory, except that opening `mem://broken` panics
    struct PanickingSource {
        memory: MemorySource,
    }

    impl AssetSource for PanickingSource {
        fn open(&self, locator: &str) -> Result<AssetStream, FetchError> {
            if locator == "mem://broken" {
                panic!("source blew up");
            }
            self.memory.open(locator)
        }
    }

    fn loader_with(memory: Arc<MemorySource>) -> AssetLoader {
        AssetLoader::new(memory, LoaderConfig { chunk_size: 1024, ..Default::default() })
    }

    fn track(id: &str) -> Track {
        Track::new(id, id, format!("mem://{}", id))
    }

    #[test]
    fn test_duration_is_longest_track() {
        let memory = Arc::new(MemorySource::new());
        memory.insert("mem://drums", wav_bytes(10.0, 800, 1, 0.1));
        memory.insert("mem://bass", wav_bytes(12.0, 800, 1, 0.1));
        memory.insert_unsized("mem://keys", wav_bytes(9.0, 800, 1, 0.1));

        let mut loader = loader_with(memory);
        loader.begin(&[track("drums"), track("bass"), track("keys")]);
        assert!(loader.is_loading());

        let outcome = loader.wait(WAIT).unwrap();
        match outcome {
            LoadOutcome::Ready { duration } => assert!((duration - 12.0).abs() < 1e-6),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(loader.buffers().len(), 3);
        assert!(loader.errors().is_empty());
        assert_eq!(loader.progress().overall(), 100.0);
        assert_eq!(loader.progress().track(&TrackId::from("keys")), Some(100.0));
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_one_failure_is_isolated() {
        let memory = Arc::new(MemorySource::new());
        memory.insert("mem://drums", wav_bytes(1.0, 800, 2, 0.1));
        memory.insert_failure("mem://bass", FetchError::Http { status: 404, url: "mem://bass".into() });
        memory.insert("mem://keys", b"not audio at all".to_vec());
        memory.insert("mem://vox", wav_bytes(2.0, 800, 2, 0.1));

        let mut loader = loader_with(memory);
        loader.begin(&[track("drums"), track("bass"), track("keys"), track("vox")]);
        let outcome = loader.wait(WAIT).unwrap();

        assert_eq!(outcome, LoadOutcome::Ready { duration: 2.0 });
        let failed: Vec<_> = loader.errors().keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(failed, vec!["bass", "keys"]);
        assert!(matches!(loader.errors()[&TrackId::from("bass")], TrackLoadError::Fetch(_)));
        assert!(matches!(loader.errors()[&TrackId::from("keys")], TrackLoadError::Decode(_)));
        assert!(loader.buffer(&TrackId::from("drums")).is_some());
        assert!(loader.buffer(&TrackId::from("vox")).is_some());
    }

    #[test]
    fn test_all_failed_is_fatal() {
        let memory = Arc::new(MemorySource::new());
        let mut loader = loader_with(memory);
        loader.begin(&[track("a"), track("b")]);

        let outcome = loader.wait(WAIT).unwrap();
        assert_eq!(outcome, LoadOutcome::Failed(FatalLoadError { failed: 2 }));
        assert!(loader.buffers().is_empty());
        assert_eq!(loader.errors().len(), 2);
    }

    #[test]
    fn test_empty_track_set_is_idle() {
        let mut loader = loader_with(Arc::new(MemorySource::new()));
        loader.begin(&[]);
        assert!(!loader.is_loading());
        assert!(loader.poll().is_none());
        assert_eq!(loader.progress().overall(), 0.0);
    }

    #[test]
    fn test_superseded_cycle_never_populates_buffers() {
        let memory = Arc::new(MemorySource::new());
        let gate = SourceGate::new();
        memory.insert_gated("mem://old", wav_bytes(1.0, 800, 1, 0.1), gate.clone());
        memory.insert("mem://new", wav_bytes(1.0, 800, 1, 0.1));

        let mut loader = loader_with(memory);
        let first = loader.begin(&[track("old")]);
        let second = loader.begin(&[track("new")]);
        assert!(second > first);

        let outcome = loader.wait(WAIT).unwrap();
        assert!(matches!(outcome, LoadOutcome::Ready { .. }));

        // Let the superseded worker finish, then drain whatever it sends
        gate.release();
        thread::sleep(Duration::from_millis(100));
        assert!(loader.poll().is_none());

        let ids: Vec<_> = loader.buffers().keys().cloned().collect();
        assert_eq!(ids, vec![TrackId::from("new")]);
    }

    #[test]
    fn test_stale_event_is_discarded() {
        let memory = Arc::new(MemorySource::new());
        memory.insert("mem://a", wav_bytes(1.0, 800, 1, 0.1));
        let mut loader = loader_with(memory);

        let stale = loader.begin(&[track("a")]);
        let _ = loader.begin(&[track("a")]);

        let buffer = Shared::new(&gc_handle(), audio_file::decode(wav_bytes(5.0, 800, 1, 0.1), None).unwrap());
        loader
            .events_tx
            .send(LoadEvent::Finished {
                generation: stale,
                track: TrackId::from("a"),
                result: Ok(buffer),
            })
            .unwrap();

        let outcome = loader.wait(WAIT).unwrap();
        assert_eq!(outcome, LoadOutcome::Ready { duration: 1.0 });
    }

    #[test]
    fn test_cancel_drops_everything() {
        let memory = Arc::new(MemorySource::new());
        memory.insert("mem://a", wav_bytes(0.5, 800, 1, 0.1));
        let mut loader = loader_with(memory);
        loader.begin(&[track("a")]);
        loader.wait(WAIT).unwrap();
        assert_eq!(loader.buffers().len(), 1);

        loader.cancel();
        assert!(loader.buffers().is_empty());
        assert!(!loader.is_loading());
        assert!(loader.outcome().is_none());
    }

    #[test]
    fn test_oversized_content_length_still_settles() {
        let source = Arc::new(OversizedLengthSource {
            body: wav_bytes(1.5, 800, 1, 0.1),
        });
        let mut loader = AssetLoader::new(source, LoaderConfig { chunk_size: 1024, ..Default::default() });
        loader.begin(&[track("drums"), track("bass")]);

        let outcome = loader.wait(WAIT).unwrap();
        assert_eq!(outcome, LoadOutcome::Ready { duration: 1.5 });
        assert_eq!(loader.buffers().len(), 2);
        assert!(loader.errors().is_empty());
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_panicking_worker_reports_failure() {
        let memory = MemorySource::new();
        memory.insert("mem://drums", wav_bytes(1.0, 800, 1, 0.1));
        let source = Arc::new(PanickingSource { memory });
        let mut loader = AssetLoader::new(source, LoaderConfig { chunk_size: 1024, ..Default::default() });
        loader.begin(&[track("drums"), track("broken")]);

        let outcome = loader.wait(WAIT).unwrap();
        assert_eq!(outcome, LoadOutcome::Ready { duration: 1.0 });
        assert!(loader.buffer(&TrackId::from("drums")).is_some());
        match &loader.errors()[&TrackId::from("broken")] {
            TrackLoadError::Worker(message) => assert!(message.contains("source blew up")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_read_stream_abandons_when_told() {
        let stream = AssetStream::new(Some(4096), std::io::Cursor::new(vec![7u8; 4096]));
        let mut calls = 0;
        let result = read_stream(stream, 1024, |read, total| {
            calls += 1;
            assert_eq!(total, Some(4096));
            read < 2048
        });
        assert_eq!(result, Ok(None));
        assert_eq!(calls, 2);
    }
}
