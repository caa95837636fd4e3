//! Playback instances of decoded buffers
//!
//! A [`Voice`] is one "source started at an offset": it reads a shared
//! [`LoadedBuffer`] from a fractional frame position, follows its track's
//! [`MixNode`] gain with a per-block ramp, and renders into a pre-allocated
//! scratch buffer. Voices are built on the control thread and handed to the
//! render thread through the command queue; nothing here allocates while
//! rendering.

use std::sync::Arc;

use basedrop::Shared;

use super::mixer::MixNode;
use crate::audio::MAX_BUFFER_SIZE;
use crate::audio_file::LoadedBuffer;
use crate::types::{StereoBuffer, StereoSample};

/// Linear amplitude envelope used for pad fades
#[derive(Debug, Clone, Copy)]
struct Envelope {
    value: f32,
    target: f32,
    increment: f32,
    releasing: bool,
}

impl Envelope {
    fn open() -> Self {
        Self {
            value: 1.0,
            target: 1.0,
            increment: 0.0,
            releasing: false,
        }
    }

    fn ramp(&mut self, target: f32, seconds: f64, sample_rate: u32) {
        let frames = (seconds * sample_rate as f64).max(1.0) as f32;
        self.target = target;
        self.increment = (target - self.value) / frames;
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.increment != 0.0 {
            self.value += self.increment;
            let reached = (self.increment > 0.0 && self.value >= self.target)
                || (self.increment < 0.0 && self.value <= self.target);
            if reached {
                self.value = self.target;
                self.increment = 0.0;
            }
        }
        self.value
    }

    fn is_silent_release(&self) -> bool {
        self.releasing && self.increment == 0.0 && self.value <= 0.0
    }
}

/// One playing instance of a buffer
pub struct Voice {
    buffer: Shared<LoadedBuffer>,
    node: Arc<MixNode>,
    /// Read position in source frames
    position: f64,
    /// Playback rate (1.0 = original pitch)
    rate: f64,
    looping: bool,
    /// Gain applied at the end of the previous block
    gain: f32,
    envelope: Envelope,
    scratch: StereoBuffer,
    finished: bool,
}

impl Voice {
    /// A voice starting at `offset` seconds into `buffer`
    pub fn new(buffer: Shared<LoadedBuffer>, node: Arc<MixNode>, offset: f64) -> Self {
        let position = offset.max(0.0) * buffer.sample_rate() as f64;
        let gain = node.output_gain();
        Self {
            buffer,
            node,
            position,
            rate: 1.0,
            looping: false,
            gain,
            envelope: Envelope::open(),
            scratch: StereoBuffer::with_capacity(MAX_BUFFER_SIZE),
            finished: false,
        }
    }

    /// Endless voice at a pitch-shifting playback rate (pad)
    pub fn looping(buffer: Shared<LoadedBuffer>, node: Arc<MixNode>, rate: f64) -> Self {
        let mut voice = Self::new(buffer, node, 0.0);
        voice.rate = rate.max(0.0);
        voice.looping = true;
        voice
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Position in seconds of source audio
    pub fn position_seconds(&self) -> f64 {
        self.position / self.buffer.sample_rate().max(1) as f64
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    fn step(&self, output_rate: u32) -> f64 {
        self.rate * self.buffer.sample_rate() as f64 / output_rate.max(1) as f64
    }

    /// Skip ahead by `frames` output frames without rendering
    ///
    /// Used to compensate for the time a start command spent in the queue.
    pub fn skip(&mut self, frames: u64, output_rate: u32) {
        self.position += frames as f64 * self.step(output_rate);
        self.wrap_or_finish();
    }

    /// Ramp up from silence over `seconds`
    pub fn fade_in(&mut self, seconds: f64, output_rate: u32) {
        self.envelope.value = 0.0;
        self.envelope.releasing = false;
        self.envelope.ramp(1.0, seconds, output_rate);
    }

    /// Ramp down to silence over `seconds`, then finish
    pub fn release(&mut self, seconds: f64, output_rate: u32) {
        self.envelope.releasing = true;
        self.envelope.ramp(0.0, seconds, output_rate);
    }

    fn wrap_or_finish(&mut self) {
        let len = self.buffer.len() as f64;
        if self.position < len {
            return;
        }
        if self.looping && len > 0.0 {
            self.position %= len;
        } else {
            self.finished = true;
        }
    }

    /// Render `frames` frames into the voice's scratch buffer
    pub fn render(&mut self, frames: usize, output_rate: u32) {
        self.scratch.set_len_from_capacity(frames);
        if self.finished {
            self.scratch.fill_silence();
            return;
        }

        let step = self.step(output_rate);
        let target = self.node.output_gain();
        let gain_step = (target - self.gain) / frames.max(1) as f32;
        let mut gain = self.gain;

        // Swapped out for the loop so the voice can advance itself; no allocation
        let mut scratch = std::mem::take(&mut self.scratch);
        for out in scratch.iter_mut() {
            if self.finished {
                *out = StereoSample::silence();
                continue;
            }
            gain += gain_step;
            let envelope = self.envelope.next();
            *out = self.buffer.frame_at(self.position) * (gain * envelope);
            self.position += step;
            self.wrap_or_finish();
        }
        self.scratch = scratch;

        self.gain = target;
        if self.envelope.is_silent_release() {
            self.finished = true;
        }
    }

    /// Output of the last [`render`](Self::render) call
    pub fn output(&self) -> &StereoBuffer {
        &self.scratch
    }
}
