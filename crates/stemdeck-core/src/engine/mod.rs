//! Playback engine - transport, mixing, voices and the render loop
//!
//! Control side (session thread):
//! - `Transport`: play/pause/seek/stop arithmetic over an engine clock
//! - `MixGraph` / `MixerHistory`: per-track levels and their undo log
//! - `LoopController`: the loop region the transport wraps on
//! - `AmbientPadEngine`: key-transposed looping pad
//!
//! Render side (audio thread):
//! - `AudioEngine`: executes `EngineCommand`s and sums `Voice`s to master
//!
//! The two sides only meet through the lock-free command queue, atomics on
//! `MixNode`, and the shared `SampleClock`.

mod clock;
mod command;
mod engine;
pub mod gc;
mod history;
mod loop_region;
mod mixer;
mod pad;
mod transport;
mod voice;

pub use clock::{EngineClock, ManualClock, SampleClock, SystemClock};
pub use command::{command_channel, EngineCommand, VoiceBatch, COMMAND_QUEUE_CAPACITY};
pub use engine::{AudioEngine, MAX_PAD_VOICES};
pub use history::{MixerHistory, MixerSnapshot, TrackMix};
pub use loop_region::{LoopController, LoopRegion, LoopUpdate};
pub use mixer::{effective_level, MixGraph, MixNode};
pub use pad::{AmbientPadEngine, PadConfig, PadError};
pub use transport::{NullSink, PlaybackSink, PlaybackSource, TickOutcome, Transport, TransportState};
pub use voice::Voice;

#[cfg(test)]
pub(crate) use transport::test_sink;
