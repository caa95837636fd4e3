//! Audio output backend (CPAL)
//!
//! The audio system follows a lock-free design for real-time safety:
//!
//! - **Session thread**: sends commands via a lock-free ringbuffer
//! - **Audio thread**: owns the `AudioEngine` exclusively, processes commands
//! - **Atomics**: the transport reads time from the shared `SampleClock`
//!
//! # Example Usage
//!
//! ```ignore
//! use stemdeck_core::audio::{start_audio_system, AudioConfig};
//!
//! let audio = start_audio_system(&AudioConfig::default())?;
//! let transport = Transport::new(audio.clock.clone(), Box::new(audio.command_sender));
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;

pub use backend::{start_audio_system, AudioSystemResult, CommandSender};
pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use cpal_backend::AudioHandle;
pub use device::{get_output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
