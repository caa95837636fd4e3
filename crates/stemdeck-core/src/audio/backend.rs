//! Audio system startup and the control-side command sender
//!
//! The audio thread owns the [`AudioEngine`](crate::engine::AudioEngine)
//! exclusively. Everything else talks to it through [`CommandSender`]
//! (lock-free ringbuffer) and reads time from the shared
//! [`SampleClock`].

use std::sync::Arc;

use basedrop::Owned;

use super::config::AudioConfig;
use super::cpal_backend::AudioHandle;
use super::error::AudioResult;
use crate::engine::gc::gc_handle;
use crate::engine::{EngineCommand, PlaybackSink, SampleClock, Voice, VoiceBatch};

/// Result of starting the audio system
pub struct AudioSystemResult {
    /// Keeps the stream alive (drop to stop audio)
    pub handle: AudioHandle,
    /// Command sender for the control thread (lock-free)
    pub command_sender: CommandSender,
    /// Clock advanced by the render callback
    pub clock: Arc<SampleClock>,
    pub sample_rate: u32,
    /// Buffer size in frames as requested from the device
    pub buffer_size: u32,
    /// One-way output latency in milliseconds
    pub latency_ms: f32,
}

/// Command sender for the control thread
///
/// Wraps the lock-free producer for sending [`EngineCommand`]s to the audio
/// thread. All operations are non-blocking. Voice and pad starts that meet a
/// full queue are dropped; stops and pad releases are held and retried on
/// [`flush`](PlaybackSink::flush) so nothing keeps sounding after it was
/// told to stop.
pub struct CommandSender {
    pub(crate) producer: rtrb::Producer<EngineCommand>,
    stop_pending: bool,
    release_pending: Option<f64>,
}

impl CommandSender {
    pub fn new(producer: rtrb::Producer<EngineCommand>) -> Self {
        Self {
            producer,
            stop_pending: false,
            release_pending: None,
        }
    }

    /// Queue a command; returns it back if the queue is full
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Check if the queue has space for more commands
    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }

    /// True while a stop or pad release is waiting for queue space
    pub fn has_pending(&self) -> bool {
        self.stop_pending || self.release_pending.is_some()
    }

    fn send_or_warn(&mut self, cmd: EngineCommand, what: &str) {
        if self.has_pending() {
            log::warn!("Engine command queue backed up, dropped {}", what);
            return;
        }
        if self.send(cmd).is_err() {
            log::warn!("Engine command queue full, dropped {}", what);
        }
    }
}

impl PlaybackSink for CommandSender {
    fn start(&mut self, batch: VoiceBatch) {
        self.flush();
        let batch = Owned::new(&gc_handle(), batch);
        self.send_or_warn(EngineCommand::StartVoices(batch), "voice start");
    }

    fn stop(&mut self) {
        self.flush();
        if self.stop_pending || self.send(EngineCommand::StopVoices).is_err() {
            log::warn!("Engine command queue full, voice stop will be retried");
            self.stop_pending = true;
        }
    }

    fn start_pad(&mut self, voice: Voice, fade_in: f64) {
        self.flush();
        let voice = Owned::new(&gc_handle(), voice);
        self.send_or_warn(EngineCommand::StartPad { voice, fade_in }, "pad start");
    }

    fn release_pad(&mut self, seconds: f64) {
        self.flush();
        if self.release_pending.is_some() || self.send(EngineCommand::ReleasePad { seconds }).is_err() {
            log::warn!("Engine command queue full, pad release will be retried");
            self.release_pending = Some(seconds);
        }
    }

    fn flush(&mut self) {
        if self.stop_pending {
            if self.send(EngineCommand::StopVoices).is_err() {
                return;
            }
            log::debug!("Delivered held voice stop");
            self.stop_pending = false;
        }
        if let Some(seconds) = self.release_pending {
            if self.send(EngineCommand::ReleasePad { seconds }).is_err() {
                return;
            }
            log::debug!("Delivered held pad release");
            self.release_pending = None;
        }
    }
}

/// Open the configured output device and start rendering
pub fn start_audio_system(config: &AudioConfig) -> AudioResult<AudioSystemResult> {
    super::cpal_backend::start_audio_system(config)
}
