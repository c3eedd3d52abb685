//! Audio capture from the microphone.
//!
//! The cpal callback only downmixes into a lock-free ring buffer. A tokio
//! task drains the ring, resamples to the wire rate and cuts fixed-size
//! frames for the session loop.

use crate::audio_utils::StreamResampler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use jarvis_core::{JarvisError, capture::FRAME_SIZE, pcm::CAPTURE_SAMPLE_RATE};
use ringbuf::{
    HeapCons, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::Arc;
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

/// Seconds of device audio the ring holds while the framer catches up.
const RING_SECONDS: usize = 2;
const DRAIN_CHUNK: usize = 2048;

fn unavailable(err: impl std::fmt::Display) -> JarvisError {
    JarvisError::CaptureUnavailable(err.to_string())
}

/// An open microphone stream. Capture stops when this is dropped.
pub struct Microphone {
    _stream: Stream,
    framer: JoinHandle<()>,
}

impl Microphone {
    /// Opens the default input device and starts delivering
    /// [`FRAME_SIZE`]-sample mono frames at 16 kHz into `frames`.
    ///
    /// Frames are dropped when `frames` is full.
    pub fn open(frames: mpsc::Sender<Vec<f32>>) -> Result<Self, JarvisError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| unavailable("no input device available"))?;

        let config: StreamConfig = input_config(&device)?.config();
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);
        let assembler = FrameAssembler::new(device_rate).map_err(unavailable)?;

        debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            "audio capture initialized"
        );

        let (mut producer, consumer) = HeapRb::<f32>::new(device_rate as usize * RING_SECONDS).split();
        let ready = Arc::new(Notify::new());
        let notify = Arc::clone(&ready);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        producer.push_slice(data);
                    } else {
                        for frame in data.chunks_exact(channels) {
                            let _ = producer.try_push(frame.iter().sum::<f32>() / channels as f32);
                        }
                    }
                    notify.notify_one();
                },
                |err| {
                    error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(unavailable)?;
        stream.play().map_err(unavailable)?;

        let framer = tokio::spawn(frame_loop(consumer, ready, assembler, frames));
        debug!("audio capture started");
        Ok(Self {
            _stream: stream,
            framer,
        })
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.framer.abort();
        debug!("audio capture stopped");
    }
}

/// Picks an `f32` input config, preferring one that runs natively at the
/// wire rate with the fewest channels.
fn input_config(device: &Device) -> Result<SupportedStreamConfig, JarvisError> {
    let target = SampleRate(CAPTURE_SAMPLE_RATE);
    let native = device
        .supported_input_configs()
        .map_err(unavailable)?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= target && c.max_sample_rate() >= target)
        .min_by_key(|c| c.channels());
    if let Some(range) = native {
        return Ok(range.with_sample_rate(target));
    }

    let fallback = device.default_input_config().map_err(unavailable)?;
    if fallback.sample_format() != SampleFormat::F32 {
        return Err(unavailable(format!(
            "unsupported input sample format {:?}",
            fallback.sample_format()
        )));
    }
    Ok(fallback)
}

async fn frame_loop(
    mut consumer: HeapCons<f32>,
    ready: Arc<Notify>,
    mut assembler: FrameAssembler,
    frames: mpsc::Sender<Vec<f32>>,
) {
    let mut scratch = vec![0.0f32; DRAIN_CHUNK];
    while !frames.is_closed() {
        ready.notified().await;
        loop {
            let read = consumer.pop_slice(&mut scratch);
            if read == 0 {
                break;
            }
            for frame in assembler.push(&scratch[..read]) {
                if frames.try_send(frame).is_err() {
                    debug!("Capture frame dropped, session loop is behind");
                }
            }
        }
    }
}

/// Turns device-rate mono audio into fixed-size frames at the wire rate.
pub struct FrameAssembler {
    resampler: Option<StreamResampler>,
    output: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(device_rate: u32) -> anyhow::Result<Self> {
        let resampler = if device_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(StreamResampler::new(device_rate, CAPTURE_SAMPLE_RATE)?)
        };
        Ok(Self {
            resampler,
            output: Vec::with_capacity(FRAME_SIZE * 2),
        })
    }

    /// Buffers `samples` and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        match self.resampler.as_mut() {
            None => self.output.extend_from_slice(samples),
            Some(resampler) => match resampler.push(samples) {
                Ok(converted) => self.output.extend(converted),
                Err(e) => warn!(error = %e, "Dropping capture audio that failed to resample"),
            },
        }

        let mut frames = Vec::new();
        while self.output.len() >= FRAME_SIZE {
            frames.push(self.output.drain(..FRAME_SIZE).collect());
        }
        frames
    }
}
