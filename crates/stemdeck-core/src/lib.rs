//! Stemdeck Core - synchronized multi-track (stems) playback
//!
//! Loads a song's stems concurrently, plays them sample-aligned from a
//! single transport, mixes them with per-track trim, fader, mute and solo,
//! and keeps an undo log of mixer edits. An optional ambient pad plays a
//! looping sample transposed to a chosen key.

pub mod audio;
pub mod audio_file;
pub mod config;
pub mod engine;
pub mod loader;
pub mod music;
pub mod session;
pub mod song;
pub mod types;

pub use types::*;
