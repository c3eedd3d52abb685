//! cpal-backed audio devices for a live session.

pub mod capture;
pub mod output;

pub use capture::Microphone;
pub use output::SpeakerOutput;

use jarvis_core::{
    JarvisError,
    playback::{AudioOutput, BufferId},
    spectrum::FrequencyTap,
};
use tokio::sync::mpsc;

/// Acquires the input and output devices of one session.
pub trait AudioDevices {
    type Output: AudioOutput;
    /// Keeps capture running for as long as it is held.
    type Capture;

    /// Opens the output. Natural ends of scheduled buffers arrive on the
    /// returned receiver; rendered audio is fed to `tap`.
    fn open_output(
        &mut self,
        tap: FrequencyTap,
    ) -> Result<(Self::Output, mpsc::UnboundedReceiver<BufferId>), JarvisError>;

    /// Opens the input, delivering wire-rate frames into `frames`.
    fn open_capture(
        &mut self,
        frames: mpsc::Sender<Vec<f32>>,
    ) -> Result<Self::Capture, JarvisError>;
}

/// The host's default microphone and speakers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAudio;

impl AudioDevices for SystemAudio {
    type Output = SpeakerOutput;
    type Capture = Microphone;

    fn open_output(
        &mut self,
        tap: FrequencyTap,
    ) -> Result<(SpeakerOutput, mpsc::UnboundedReceiver<BufferId>), JarvisError> {
        SpeakerOutput::open(tap)
    }

    fn open_capture(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<Microphone, JarvisError> {
        Microphone::open(frames)
    }
}
