//! Decoding of fetched track blobs
//!
//! Track sources hand the loader an opaque encoded-audio blob (WAV, FLAC,
//! OGG/Vorbis or MP3). This module probes the container with symphonia and
//! decodes the first audio track to interleaved stereo f32 at the file's own
//! sample rate. Rate conversion to the device rate happens at playback time.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::{StereoBuffer, StereoSample};

/// Upper bound on frames reserved from a container's declared length
const MAX_PREALLOC_FRAMES: u64 = 1 << 22;

/// Errors raised while decoding a track blob
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track found in stream")]
    NoAudioTrack,

    #[error("Unknown sample rate")]
    UnknownSampleRate,

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Stream decoded to zero samples")]
    Empty,
}

/// Decoded audio for one track
///
/// Never mutated after decode; the loader wraps it in a `basedrop::Shared`
/// so the render thread can hold it without owning the deallocation.
#[derive(Debug, Clone)]
pub struct LoadedBuffer {
    samples: StereoBuffer,
    sample_rate: u32,
}

impl LoadedBuffer {
    pub fn new(samples: StereoBuffer, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &StereoBuffer {
        &self.samples
    }

    /// Read a frame at a fractional position with linear interpolation
    ///
    /// Positions outside the buffer read as silence.
    #[inline]
    pub fn frame_at(&self, position: f64) -> StereoSample {
        if position < 0.0 {
            return StereoSample::silence();
        }
        let index = position as usize;
        let len = self.samples.len();
        if index >= len {
            return StereoSample::silence();
        }
        let frac = (position - index as f64) as f32;
        let a = self.samples[index];
        if frac == 0.0 || index + 1 >= len {
            return a;
        }
        a.lerp(&self.samples[index + 1], frac)
    }
}

/// Decode an encoded-audio blob into a stereo buffer
///
/// `extension_hint` is the locator's file extension when one is known; the
/// probe falls back to content sniffing without it. Mono sources are
/// duplicated to both channels and anything above two channels keeps only
/// the first pair.
pub fn decode(bytes: Vec<u8>, extension_hint: Option<&str>) -> Result<LoadedBuffer, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or(DecodeError::UnknownSampleRate)?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples = StereoBuffer::with_capacity(prealloc_frames(track.codec_params.n_frames));
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count();
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            push_frames(&mut samples, buf.samples(), channels);
        }
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    log::debug!(
        "Decoded {} frames at {}Hz ({} source channels)",
        samples.len(),
        sample_rate,
        channels
    );

    Ok(LoadedBuffer::new(samples, sample_rate))
}

/// Frames to reserve for a stream declaring `n_frames`
///
/// Headers are untrusted, so the reservation is capped and the buffer grows
/// past it as real packets arrive.
fn prealloc_frames(n_frames: Option<u64>) -> usize {
    n_frames.map_or(0, |n| n.min(MAX_PREALLOC_FRAMES) as usize)
}

/// Fold interleaved frames of any channel count into stereo
fn push_frames(out: &mut StereoBuffer, interleaved: &[f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            for &s in interleaved {
                out.push(StereoSample::mono(s));
            }
        }
        n => {
            for frame in interleaved.chunks_exact(n) {
                out.push(StereoSample::new(frame[0], frame[1]));
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::wav_bytes;
    use super::*;

    #[test]
    fn test_decode_stereo_wav_duration() {
        let bytes = wav_bytes(0.5, 8000, 2, 0.25);
        let buffer = decode(bytes, Some("wav")).unwrap();
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.len(), 4000);
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
        assert!((buffer.samples()[10].left - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_decode_mono_duplicates_channels() {
        let bytes = wav_bytes(0.1, 8000, 1, 0.5);
        let buffer = decode(bytes, None).unwrap();
        assert_eq!(buffer.len(), 800);
        let frame = buffer.samples()[0];
        assert_eq!(frame.left, frame.right);
        assert!((frame.left - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_prealloc_is_capped() {
        assert_eq!(prealloc_frames(None), 0);
        assert_eq!(prealloc_frames(Some(4000)), 4000);
        assert_eq!(prealloc_frames(Some(u64::MAX)), MAX_PREALLOC_FRAMES as usize);
    }

    #[test]
    fn test_decode_survives_inflated_data_length() {
        let mut bytes = wav_bytes(0.1, 8000, 1, 0.5);
        let data = bytes.windows(4).position(|w| w == b"data").unwrap();
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[data + 4..data + 8].copy_from_slice(&0xFFFF_FF00u32.to_le_bytes());

        // The header now claims about two billion frames; only 800 exist
        if let Ok(buffer) = decode(bytes, Some("wav")) {
            assert!(buffer.len() <= 800);
        }
    }

    #[test]
    fn test_decode_garbage_is_unsupported() {
        let result = decode(b"definitely not audio".to_vec(), Some("wav"));
        assert!(matches!(result, Err(DecodeError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_frame_at_interpolates_and_bounds() {
        let samples = StereoBuffer::from_interleaved(&[0.0, 0.0, 1.0, -1.0]);
        let buffer = LoadedBuffer::new(samples, 48000);
        let mid = buffer.frame_at(0.5);
        assert!((mid.left - 0.5).abs() < 1e-6);
        assert!((mid.right + 0.5).abs() < 1e-6);
        assert_eq!(buffer.frame_at(1.0).left, 1.0);
        assert_eq!(buffer.frame_at(2.0), StereoSample::silence());
        assert_eq!(buffer.frame_at(-1.0), StereoSample::silence());
    }
}
