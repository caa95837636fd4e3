//! Render-side audio engine - sums track and pad voices into the master bus

use std::sync::Arc;

use basedrop::Owned;
use rayon::prelude::*;

use super::clock::{EngineClock, SampleClock};
use super::command::{EngineCommand, VoiceBatch};
use super::voice::Voice;
use crate::types::StereoBuffer;

/// Pad voices alive at once (one sounding, others fading out)
pub const MAX_PAD_VOICES: usize = 4;

/// The render-side engine
///
/// Owned exclusively by the audio thread. It never decides *what* plays;
/// it executes commands and advances the shared [`SampleClock`] by exactly
/// the number of frames it renders.
pub struct AudioEngine {
    sample_rate: u32,
    clock: Arc<SampleClock>,
    /// Track voices of the current playback segment
    voices: Option<Owned<VoiceBatch>>,
    pad_voices: Vec<Owned<Voice>>,
}

impl AudioEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: Arc::new(SampleClock::new(sample_rate)),
            voices: None,
            pad_voices: Vec::with_capacity(MAX_PAD_VOICES),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clock advanced by this engine; share it with the transport
    pub fn clock(&self) -> Arc<SampleClock> {
        Arc::clone(&self.clock)
    }

    /// Number of track voices still producing audio
    pub fn active_voices(&self) -> usize {
        self.voices
            .as_ref()
            .map_or(0, |b| b.voices.iter().filter(|v| !v.is_finished()).count())
    }

    pub fn pad_voice_count(&self) -> usize {
        self.pad_voices.len()
    }

    /// Apply every queued command (lock-free, called once per block)
    pub fn process_commands(&mut self, rx: &mut rtrb::Consumer<EngineCommand>) {
        while let Ok(command) = rx.pop() {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::StartVoices(mut batch) => {
                let lag = (self.clock.now() - batch.engine_start).max(0.0);
                let lag_frames = (lag * self.sample_rate as f64).round() as u64;
                if lag_frames > 0 {
                    for voice in batch.voices.iter_mut() {
                        voice.skip(lag_frames, self.sample_rate);
                    }
                }
                // Previous batch is released to the GC thread
                self.voices = Some(batch);
            }
            EngineCommand::StopVoices => {
                self.voices = None;
            }
            EngineCommand::StartPad { mut voice, fade_in } => {
                voice.fade_in(fade_in, self.sample_rate);
                if self.pad_voices.len() >= MAX_PAD_VOICES {
                    self.pad_voices.remove(0);
                }
                self.pad_voices.push(voice);
            }
            EngineCommand::ReleasePad { seconds } => {
                for voice in self.pad_voices.iter_mut() {
                    voice.release(seconds, self.sample_rate);
                }
            }
        }
    }

    /// Render one block into `output`
    pub fn process(&mut self, output: &mut StereoBuffer) {
        let frames = output.len();
        let sample_rate = self.sample_rate;
        output.fill_silence();

        if let Some(batch) = self.voices.as_mut() {
            // Phase 1: every voice renders into its own scratch buffer in parallel
            batch
                .voices
                .par_iter_mut()
                .for_each(|voice| voice.render(frames, sample_rate));

            // Phase 2: sequential sum to master
            for voice in batch.voices.iter() {
                output.add_buffer(voice.output());
            }
        }

        for voice in self.pad_voices.iter_mut() {
            voice.render(frames, sample_rate);
            output.add_buffer(voice.output());
        }
        self.pad_voices.retain(|v| !v.is_finished());

        self.clock.advance(frames as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::LoadedBuffer;
    use crate::engine::command::command_channel;
    use crate::engine::gc::gc_handle;
    use crate::engine::mixer::MixNode;
    use crate::types::StereoSample;
    use basedrop::Shared;

    fn ramp(frames: usize, sample_rate: u32) -> Shared<LoadedBuffer> {
        let samples = (0..frames).map(|i| StereoSample::mono(i as f32)).collect();
        Shared::new(&gc_handle(), LoadedBuffer::new(StereoBuffer::from_vec(samples), sample_rate))
    }

    fn unity() -> Arc<MixNode> {
        Arc::new(MixNode::new(1.0, 1.0))
    }

    #[test]
    fn test_voices_sum_and_clock_advances() {
        let mut engine = AudioEngine::new(100);
        let (mut tx, mut rx) = command_channel();

        let voices = vec![Voice::new(ramp(100, 100), unity(), 0.0), Voice::new(ramp(100, 100), unity(), 0.0)];
        let batch = Owned::new(&gc_handle(), VoiceBatch::new(voices, 0.0));
        assert!(tx.push(EngineCommand::StartVoices(batch)).is_ok());

        let mut out = StereoBuffer::silence(4);
        engine.process_commands(&mut rx);
        engine.process(&mut out);

        assert_eq!(out[3].left, 6.0);
        assert_eq!(engine.clock().frames(), 4);
        assert_eq!(engine.active_voices(), 2);
    }

    #[test]
    fn test_queue_lag_is_compensated() {
        let mut engine = AudioEngine::new(100);
        let (mut tx, mut rx) = command_channel();
        let mut out = StereoBuffer::silence(10);

        // Batch scheduled at t=0, but the engine has already rendered 10 frames
        let batch = Owned::new(&gc_handle(), VoiceBatch::new(vec![Voice::new(ramp(100, 100), unity(), 0.0)], 0.0));
        engine.process(&mut out);
        assert!(tx.push(EngineCommand::StartVoices(batch)).is_ok());
        engine.process_commands(&mut rx);
        engine.process(&mut out);

        assert_eq!(out[0].left, 10.0);
    }

    #[test]
    fn test_stop_silences_everything() {
        let mut engine = AudioEngine::new(100);
        let (mut tx, mut rx) = command_channel();
        let batch = Owned::new(&gc_handle(), VoiceBatch::new(vec![Voice::new(ramp(100, 100), unity(), 0.5)], 0.0));
        assert!(tx.push(EngineCommand::StartVoices(batch)).is_ok());
        assert!(tx.push(EngineCommand::StopVoices).is_ok());
        engine.process_commands(&mut rx);

        let mut out = StereoBuffer::silence(8);
        engine.process(&mut out);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn test_released_pad_voice_is_dropped() {
        let mut engine = AudioEngine::new(100);
        let (mut tx, mut rx) = command_channel();
        let voice = Owned::new(&gc_handle(), Voice::looping(ramp(50, 100), unity(), 1.0));
        assert!(tx.push(EngineCommand::StartPad { voice, fade_in: 0.0 }).is_ok());
        engine.process_commands(&mut rx);
        assert_eq!(engine.pad_voice_count(), 1);

        assert!(tx.push(EngineCommand::ReleasePad { seconds: 0.05 }).is_ok());
        engine.process_commands(&mut rx);
        let mut out = StereoBuffer::silence(10);
        engine.process(&mut out);
        assert_eq!(engine.pad_voice_count(), 0);
    }
}
