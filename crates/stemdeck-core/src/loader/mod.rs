//! Background track loading for Stemdeck
//!
//! Turns a song's track descriptors into decoded, shareable buffers:
//!
//! - `source`: locator → byte stream (files, HTTP, in-memory blobs)
//! - `progress`: per-track and aggregate percentages
//! - `asset_loader`: one worker per track, generation-tagged results
//!
//! # Message-Driven Architecture
//!
//! Workers never touch loader state directly. They send tagged events over a
//! channel and the owner applies them in `poll()`, so a late completion from a
//! superseded song cannot leak into the current buffer map.

mod asset_loader;
mod progress;
mod source;

pub(crate) use asset_loader::load_buffer;
pub use asset_loader::{
    AssetLoader, FatalLoadError, LoadOutcome, LoaderConfig, TrackLoadError, DEFAULT_CHUNK_SIZE,
};
pub use progress::LoadProgress;
pub use source::{
    extension_hint, AssetSource, AssetStream, FetchError, FileSource, MemorySource, SchemeSource,
    SourceGate,
};

#[cfg(feature = "http")]
pub use source::HttpSource;
