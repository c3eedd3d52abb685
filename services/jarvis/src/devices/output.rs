//! Audio playback to speakers.
//!
//! Buffers are mixed on a frame clock at the playback rate, so a buffer
//! scheduled at `t` seconds starts exactly `t * rate` frames after the stream
//! opened. When the device runs at another rate the mixed signal is resampled
//! as one continuous stream.

use crate::audio_utils::{StreamResampler, resample};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use jarvis_core::{
    JarvisError,
    pcm::{AudioBuffer, PLAYBACK_SAMPLE_RATE},
    playback::{AudioOutput, BufferId},
    spectrum::FrequencyTap,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

fn unavailable(err: impl std::fmt::Display) -> JarvisError {
    JarvisError::PlaybackUnavailable(err.to_string())
}

struct Voice {
    id: Option<BufferId>,
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sums scheduled buffers onto a frame clock.
///
/// Buffers with an id report their natural end; effects (no id) do not.
/// Stopped buffers are removed silently.
pub struct Mixer {
    sample_rate: u32,
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            voices: Vec::new(),
        }
    }

    pub fn current_time(&self) -> f64 {
        self.clock as f64 / f64::from(self.sample_rate)
    }

    /// Adds a buffer starting at `start_at` seconds. A start already in the
    /// past begins at the next rendered frame.
    pub fn add(&mut self, id: Option<BufferId>, samples: Vec<f32>, start_at: f64) {
        let start = (start_at * f64::from(self.sample_rate)).round().max(0.0) as u64;
        self.voices.push(Voice {
            id,
            start: start.max(self.clock),
            samples,
        });
    }

    /// Removes a buffer; returns whether it was still playing.
    pub fn stop(&mut self, id: BufferId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != Some(id));
        self.voices.len() != before
    }

    /// Renders the next `out.len()` mono frames and appends the ids of
    /// buffers that finished within them to `ended`.
    pub fn render(&mut self, out: &mut [f32], ended: &mut Vec<BufferId>) {
        out.fill(0.0);
        let begin = self.clock;
        let end = begin + out.len() as u64;

        for voice in &self.voices {
            if voice.start >= end || voice.end() <= begin {
                continue;
            }
            let from = voice.start.max(begin);
            let to = voice.end().min(end);
            let dst = &mut out[(from - begin) as usize..(to - begin) as usize];
            let src = &voice.samples[(from - voice.start) as usize..(to - voice.start) as usize];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.voices.retain(|voice| {
            let done = voice.end() <= end;
            if done {
                if let Some(id) = voice.id {
                    ended.push(id);
                }
            }
            !done
        });
        self.clock = end;
    }
}

/// The default output device driven by a [`Mixer`]. Playback stops when this
/// is dropped.
pub struct SpeakerOutput {
    _stream: Stream,
    mixer: Arc<Mutex<Mixer>>,
}

impl SpeakerOutput {
    /// Opens the default output device. Natural ends of scheduled buffers
    /// are delivered on the returned receiver; every rendered block is also
    /// fed to `tap`.
    pub fn open(tap: FrequencyTap) -> Result<(Self, mpsc::UnboundedReceiver<BufferId>), JarvisError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| unavailable("no output device available"))?;

        let config: StreamConfig = output_config(&device)?.config();
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);

        debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(PLAYBACK_SAMPLE_RATE)));
        let mut feed = MixerFeed {
            mixer: Arc::clone(&mixer),
            converter: if device_rate == PLAYBACK_SAMPLE_RATE {
                None
            } else {
                Some(StreamResampler::new(PLAYBACK_SAMPLE_RATE, device_rate).map_err(unavailable)?)
            },
            tap,
            ended: Vec::new(),
        };
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    feed.fill(&mut mono);
                    for (frame, &sample) in data.chunks_exact_mut(channels).zip(&mono) {
                        frame.fill(sample);
                    }
                    for id in feed.ended.drain(..) {
                        let _ = ended_tx.send(id);
                    }
                },
                |err| {
                    error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(unavailable)?;
        stream.play().map_err(unavailable)?;

        Ok((
            Self {
                _stream: stream,
                mixer,
            },
            ended_rx,
        ))
    }

    fn mixer_samples(buffer: AudioBuffer) -> Vec<f32> {
        if buffer.sample_rate() == PLAYBACK_SAMPLE_RATE {
            return buffer.into_samples();
        }
        resample(buffer.samples(), buffer.sample_rate(), PLAYBACK_SAMPLE_RATE).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to resample buffer for the mixer");
            Vec::new()
        })
    }
}

/// The render side of the output callback: mixes at the playback rate,
/// feeds the analyser and converts to the device rate.
struct MixerFeed {
    mixer: Arc<Mutex<Mixer>>,
    converter: Option<StreamResampler>,
    tap: FrequencyTap,
    ended: Vec<BufferId>,
}

impl MixerFeed {
    fn fill(&mut self, out: &mut [f32]) {
        let Self {
            mixer,
            converter,
            tap,
            ended,
        } = self;
        let mut render = |block: &mut [f32]| {
            match mixer.lock() {
                Ok(mut mixer) => mixer.render(block, ended),
                Err(_) => block.fill(0.0),
            }
            tap.push(block);
        };
        match converter {
            None => render(out),
            Some(converter) => {
                if let Err(e) = converter.pull(out, render) {
                    warn!(error = %e, "Failed to resample playback for the output device");
                    out.fill(0.0);
                }
            }
        }
    }
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.current_time()).unwrap_or(0.0)
    }

    fn start(&mut self, id: BufferId, buffer: AudioBuffer, start_at: f64) {
        let samples = Self::mixer_samples(buffer);
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.add(Some(id), samples, start_at);
        }
    }

    fn stop(&mut self, id: BufferId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn play_effect(&mut self, buffer: AudioBuffer) {
        let samples = Self::mixer_samples(buffer);
        if let Ok(mut mixer) = self.mixer.lock() {
            let now = mixer.current_time();
            mixer.add(None, samples, now);
        }
    }
}

/// Picks an `f32` output config at the playback rate, mono first then
/// stereo, falling back to the device default.
fn output_config(device: &Device) -> Result<SupportedStreamConfig, JarvisError> {
    let target = SampleRate(PLAYBACK_SAMPLE_RATE);
    let native = device
        .supported_output_configs()
        .map_err(unavailable)?
        .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() <= 2)
        .filter(|c| c.min_sample_rate() <= target && c.max_sample_rate() >= target)
        .min_by_key(|c| c.channels());
    if let Some(range) = native {
        return Ok(range.with_sample_rate(target));
    }

    let fallback = device.default_output_config().map_err(unavailable)?;
    if fallback.sample_format() != SampleFormat::F32 {
        return Err(unavailable(format!(
            "unsupported output sample format {:?}",
            fallback.sample_format()
        )));
    }
    Ok(fallback)
}
