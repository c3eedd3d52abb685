//! Per-frame processing of microphone audio.

use crate::pcm::{self, Blob};

/// Samples per capture frame.
pub const FRAME_SIZE: usize = 4096;
/// Mean absolute amplitude above which the user counts as audible.
pub const LISTENING_THRESHOLD: f32 = 0.01;

/// The result of processing one microphone frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub blob: Blob,
    pub level: f32,
    pub listening: bool,
}

/// Encodes frames and derives the listening level signal.
#[derive(Debug, Clone, Copy)]
pub struct CapturePipeline {
    sample_rate: u32,
    threshold: f32,
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new(pcm::CAPTURE_SAMPLE_RATE)
    }
}

impl CapturePipeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            threshold: LISTENING_THRESHOLD,
        }
    }

    pub fn process(&self, frame: &[f32]) -> CapturedFrame {
        let level = mean_abs_amplitude(frame);
        CapturedFrame {
            blob: pcm::encode(frame, self.sample_rate),
            level,
            listening: level > self.threshold,
        }
    }
}

/// Mean of `|sample|` over the frame; zero for an empty frame.
pub fn mean_abs_amplitude(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|s| s.abs()).sum::<f32>() / frame.len() as f32
}
