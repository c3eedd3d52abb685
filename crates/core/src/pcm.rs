//! PCM16 wire codec.
//!
//! Audio crosses the connection as base64 text holding 16-bit signed
//! little-endian mono samples, tagged with a `audio/pcm;rate=N` mime type.

use crate::error::{JarvisError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Sample rate of microphone frames sent upstream.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized speech received from the model.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

const SAMPLE_WIDTH: usize = 2;

/// An encoded audio chunk as it appears on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Decoded mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Mime type tag for raw PCM16 at `sample_rate`.
pub fn mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Quantizes normalized samples to PCM16 and wraps them in a wire blob.
pub fn encode(samples: &[f32], sample_rate: u32) -> Blob {
    let pcm16: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32)
                as i16;
            v.to_le_bytes()
        })
        .collect();
    Blob {
        mime_type: mime_type(sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(&pcm16),
    }
}

/// Decodes a base64 PCM16 payload into a buffer at `sample_rate`.
pub fn decode(data: &str, sample_rate: u32) -> Result<AudioBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| JarvisError::MalformedAudio(e.to_string()))?;
    decode_pcm16(&bytes, sample_rate)
}

/// Decodes raw PCM16 little-endian bytes.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(JarvisError::MalformedAudio(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
        .collect();
    Ok(AudioBuffer::new(samples, sample_rate))
}
