//! Audio transcoding between the telephony leg and the AI leg.
//!
//! The telephony side delivers PCM 16-bit mono at 8kHz; the realtime API
//! speaks PCM 16-bit mono at 24kHz. Both directions go through the linear
//! resampler here plus a base64 codec for the JSON wire formats.
//!
//! Resampling is stateless: each invocation is independent with no
//! cross-frame interpolation state. That bounds worst-case added latency to
//! one frame at the cost of minor artifacts at frame edges, which is the
//! right trade for a live call.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate of the telephony media stream (Hz).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate of the realtime API audio (Hz).
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Errors from the PCM16 base64 codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Decoded byte count is not a whole number of 16-bit samples
    #[error("odd byte count {0} is not valid PCM16")]
    OddByteCount(usize),
}

/// A buffer of signed 16-bit mono PCM samples tagged with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// PCM samples, little-endian on the wire
    pub samples: Vec<i16>,
    /// Declared sample rate in Hz (8000 or 24000)
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Wrap samples at a declared rate.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a base64 PCM16 payload into a frame at the declared rate.
    pub fn from_base64(payload: &str, sample_rate: u32) -> Result<Self, CodecError> {
        Ok(Self::new(decode_base64_pcm16(payload)?, sample_rate))
    }

    /// Convert this frame to the destination rate. The result is always
    /// tagged with the destination rate; identity when rates match.
    pub fn resampled(&self, output_rate: u32) -> AudioFrame {
        AudioFrame {
            samples: resample(&self.samples, self.sample_rate, output_rate),
            sample_rate: output_rate,
        }
    }

    /// Encode this frame's samples as base64 little-endian PCM16.
    pub fn to_base64(&self) -> String {
        encode_base64_pcm16(&self.samples)
    }

    /// Frame duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Resample PCM16 audio between sample rates using linear interpolation.
///
/// Output length is `floor(input_len * output_rate / input_rate)`. For each
/// output index the fractional source position is interpolated between the
/// two nearest input samples, clamping at the input boundary. Deterministic
/// and stateless; no buffering across calls.
pub fn resample(input: &[i16], input_rate: u32, output_rate: u32) -> Vec<i16> {
    if input_rate == output_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let output_len = (input.len() as u64 * output_rate as u64 / input_rate as u64) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let s0 = input[idx.min(input.len() - 1)] as f64;
        let s1 = input[(idx + 1).min(input.len() - 1)] as f64;

        output.push((s0 + (s1 - s0) * frac).round() as i16);
    }

    output
}

/// Encode PCM16 samples as base64 of their little-endian byte stream.
pub fn encode_base64_pcm16(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

/// Decode a base64 payload into little-endian PCM16 samples.
pub fn decode_base64_pcm16(payload: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = BASE64_STANDARD.decode(payload)?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteCount(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}
