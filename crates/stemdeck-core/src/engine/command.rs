//! Lock-free command queue for real-time engine control
//!
//! The control thread (session, pad engine) builds voices and pushes
//! commands; the audio thread pops them at the start of each block. Payloads
//! travel as `basedrop::Owned` so whatever the render thread replaces is
//! freed on the GC thread, never inside the audio callback.
//!
//! # Usage
//!
//! ```ignore
//! let (mut tx, mut rx) = command_channel();
//!
//! // Control thread
//! tx.push(EngineCommand::StopVoices)?;
//!
//! // Audio thread
//! engine.process_commands(&mut rx);
//! ```

use basedrop::Owned;

use super::voice::Voice;

/// A set of track voices started together
///
/// `engine_start` is the engine clock reading (seconds) the batch was
/// scheduled at. The render thread skips every voice forward by however long
/// the batch waited in the queue, so the audible position matches the
/// transport's arithmetic exactly.
pub struct VoiceBatch {
    pub voices: Vec<Voice>,
    pub engine_start: f64,
}

impl VoiceBatch {
    pub fn new(voices: Vec<Voice>, engine_start: f64) -> Self {
        Self { voices, engine_start }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Commands sent from the control thread to the audio thread
pub enum EngineCommand {
    /// Replace every track voice with this batch in one step
    StartVoices(Owned<VoiceBatch>),
    /// Silence every track voice
    StopVoices,
    /// Add a pad voice, ramping up from silence over `fade_in` seconds
    StartPad { voice: Owned<Voice>, fade_in: f64 },
    /// Fade every pad voice to silence over `seconds`, then drop it
    ReleasePad { seconds: f64 },
}

/// Capacity of the command queue
///
/// Transport commands arrive at most a few per tick.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Create a new command channel (producer/consumer pair)
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
