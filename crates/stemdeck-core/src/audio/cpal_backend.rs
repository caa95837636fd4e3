//! CPAL audio backend implementation
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │  Session thread  │───push()───────────►│   Command Queue     │
//! │  (ticker, ~16ms) │                     │  (lock-free SPSC)   │
//! └──────────────────┘                     └──────────┬──────────┘
//!         ▲                                           │ pop()
//!         │ SampleClock (atomic)                      ▼
//!         │                                ┌─────────────────────┐
//!         └────────────────────────────────│  CPAL Audio Thread  │
//!                                          │  (owns AudioEngine) │
//!                                          └─────────────────────┘
//! ```

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::backend::{AudioSystemResult, CommandSender};
use super::config::{AudioConfig, MAX_BUFFER_SIZE};
use super::device::{find_device_by_id, get_cpal_default_device};
use super::error::{AudioError, AudioResult};
use crate::engine::{command_channel, AudioEngine, EngineCommand};
use crate::types::{StereoBuffer, DEFAULT_SAMPLE_RATE};

/// Handle to the running output stream
///
/// Keeps the stream alive. Drop this to stop audio.
pub struct AudioHandle {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

pub fn start_audio_system(config: &AudioConfig) -> AudioResult<AudioSystemResult> {
    let device = match &config.device {
        Some(id) => find_device_by_id(id)?,
        None => get_cpal_default_device()?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported_config = get_output_config(&device, config)?;
    let sample_rate = supported_config.sample_rate().0;
    let buffer_size = config.buffer_size.frames();

    let stream_config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };

    let latency_ms = config.buffer_size.latency_ms(sample_rate);
    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        latency_ms
    );

    let engine = AudioEngine::new(sample_rate);
    let clock = engine.clock();
    let (command_tx, command_rx) = command_channel();
    let callback_state = AudioCallbackState::new(engine, command_rx);

    let stream = build_output_stream(&device, &stream_config, callback_state)?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");

    Ok(AudioSystemResult {
        handle: AudioHandle {
            _stream: stream,
            device_name,
            sample_rate,
            buffer_size,
        },
        command_sender: CommandSender::new(command_tx),
        clock,
        sample_rate,
        buffer_size,
        latency_ms,
    })
}

/// State moved into the render callback
struct AudioCallbackState {
    /// The audio engine (owned exclusively by the audio thread)
    engine: AudioEngine,
    command_rx: rtrb::Consumer<EngineCommand>,
    /// Pre-allocated master buffer
    master_buffer: StereoBuffer,
}

impl AudioCallbackState {
    fn new(engine: AudioEngine, command_rx: rtrb::Consumer<EngineCommand>) -> Self {
        Self {
            engine,
            command_rx,
            master_buffer: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Render `n_frames` into the master buffer (no allocation)
    fn process(&mut self, n_frames: usize) {
        self.master_buffer.set_len_from_capacity(n_frames.min(MAX_BUFFER_SIZE));
        self.engine.process_commands(&mut self.command_rx);
        self.engine.process(&mut self.master_buffer);
    }
}

/// Pick an f32 stereo config at the requested rate, falling back gracefully
fn get_output_config(device: &cpal::Device, config: &AudioConfig) -> AudioResult<cpal::SupportedStreamConfig> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let target_sample_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target_sample_rate >= c.min_sample_rate().0 && target_sample_rate <= c.max_sample_rate().0
    };

    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
        })
        .or_else(|| supported_configs.iter().find(|c| c.sample_format() == SampleFormat::F32))
        .ok_or_else(|| {
            match supported_configs.first() {
                Some(c) => AudioError::UnsupportedFormat(format!("{:?}", c.sample_format())),
                None => AudioError::ConfigError("No supported output configurations".to_string()),
            }
        })?;

    let sample_rate = if in_range(best_config) {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    Ok(best_config.clone().with_sample_rate(sample_rate))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: AudioCallbackState,
) -> AudioResult<Stream> {
    let channels = (config.channels as usize).max(1);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                // Hosts may ask for more than one engine block at a time
                for block in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
                    state.process(block.len() / channels);
                    write_output(block, &state.master_buffer, channels);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

/// Copy the engine's stereo mix into a device block of `channels` channels
///
/// Stereo devices take the interleaved view as is. Mono gets the left
/// channel; extra channels and any frames past the mix are silenced.
fn write_output(block: &mut [f32], master: &StereoBuffer, channels: usize) {
    if channels == 2 {
        let interleaved = master.as_interleaved();
        let n = interleaved.len().min(block.len());
        block[..n].copy_from_slice(&interleaved[..n]);
        block[n..].fill(0.0);
        return;
    }

    let samples = master.as_slice();
    for (i, frame) in block.chunks_mut(channels).enumerate() {
        match samples.get(i) {
            Some(sample) => {
                frame[0] = sample.left;
                if channels > 1 {
                    frame[1] = sample.right;
                }
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            }
            None => frame.fill(0.0),
        }
    }
}
