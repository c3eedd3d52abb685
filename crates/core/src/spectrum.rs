//! Frequency snapshot of the output signal for visualizers.
//!
//! Mirrors the semantics of a Web Audio analyser with a 256-sample window:
//! Blackman window, magnitude spectrum, 0.8 temporal smoothing, decibels in
//! `[-100, -30]` mapped onto `0..=255`.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

pub const FFT_SIZE: usize = 256;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const SMOOTHING: f64 = 0.8;
const MIN_DECIBELS: f64 = -100.0;
const MAX_DECIBELS: f64 = -30.0;

/// Rolling window of the most recent output samples.
#[derive(Debug, Clone)]
pub struct Analyser {
    window: [f32; FFT_SIZE],
    write_pos: usize,
    smoothed: [f64; BIN_COUNT],
}

impl Default for Analyser {
    fn default() -> Self {
        Self {
            window: [0.0; FFT_SIZE],
            write_pos: 0,
            smoothed: [0.0; BIN_COUNT],
        }
    }
}

impl Analyser {
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.window[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % FFT_SIZE;
        }
    }

    /// Byte-scaled magnitudes for the current window, lowest bin first.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let ordered: Vec<f64> = (0..FFT_SIZE)
            .map(|i| f64::from(self.window[(self.write_pos + i) % FFT_SIZE]) * blackman(i))
            .collect();

        (0..BIN_COUNT)
            .map(|k| {
                let (mut re, mut im) = (0.0, 0.0);
                for (n, x) in ordered.iter().enumerate() {
                    let angle = -2.0 * PI * (k * n) as f64 / FFT_SIZE as f64;
                    re += x * angle.cos();
                    im += x * angle.sin();
                }
                let magnitude = (re * re + im * im).sqrt() / FFT_SIZE as f64;
                self.smoothed[k] = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
                to_byte(self.smoothed[k])
            })
            .collect()
    }
}

fn blackman(i: usize) -> f64 {
    let a = 0.16;
    let x = i as f64 / FFT_SIZE as f64;
    (1.0 - a) / 2.0 - 0.5 * (2.0 * PI * x).cos() + a / 2.0 * (4.0 * PI * x).cos()
}

fn to_byte(magnitude: f64) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// Shared handle written by the output device and read by presentation.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTap {
    inner: Arc<Mutex<Analyser>>,
}

impl FrequencyTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut analyser) = self.inner.lock() {
            analyser.push(samples);
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner
            .lock()
            .map(|mut analyser| analyser.byte_frequency_data())
            .unwrap_or_else(|_| vec![0; BIN_COUNT])
    }

    /// Forgets buffered audio, e.g. after the output device is released.
    pub fn clear(&self) {
        if let Ok(mut analyser) = self.inner.lock() {
            *analyser = Analyser::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_has_empty_spectrum() {
        let tap = FrequencyTap::new();
        tap.push(&[0.0; FFT_SIZE]);
        let bins = tap.snapshot();
        assert_eq!(bins.len(), BIN_COUNT);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let mut analyser = Analyser::default();
        // 3 kHz at 24 kHz lands exactly on bin 32 of a 256-point window.
        let tone: Vec<f32> = (0..FFT_SIZE)
            .map(|n| (2.0 * std::f32::consts::PI * 32.0 * n as f32 / FFT_SIZE as f32).sin() * 0.01)
            .collect();
        analyser.push(&tone);

        let mut bins = Vec::new();
        for _ in 0..20 {
            bins = analyser.byte_frequency_data();
        }
        let peak = bins.iter().enumerate().max_by_key(|(_, b)| **b).map(|(i, _)| i);
        assert_eq!(peak, Some(32));
        assert!(bins[32] > 150);
        assert!(bins[31] < bins[32] && bins[33] < bins[32]);
        assert!(bins[100] < 20);
    }
}
