//! Gapless scheduling of synthesized speech.
//!
//! Incoming chunks are queued back to back on the output clock. Each chunk
//! starts no earlier than the end of the previous one and never in the past,
//! so playback is ordered and free of overlap. An interruption stops every
//! queued chunk at once.

use crate::error::Result;
use crate::pcm::{self, AudioBuffer};
use std::collections::BTreeSet;
use tracing::debug;

/// Handle identifying one scheduled buffer on the output device.
pub type BufferId = u64;

/// An audio output that can start buffers at absolute times on its own clock.
///
/// Implementations report natural completion of a buffer out of band (the
/// session loop feeds those ids back through [`PlaybackScheduler::finished`]).
#[cfg_attr(test, mockall::automock)]
pub trait AudioOutput {
    /// Seconds elapsed on the output clock.
    fn current_time(&self) -> f64;
    /// Starts `buffer` at `start_at` seconds on the output clock.
    fn start(&mut self, id: BufferId, buffer: AudioBuffer, start_at: f64);
    /// Stops a buffer. Stopping a finished or unknown buffer does nothing.
    fn stop(&mut self, id: BufferId);
    /// Plays a sound effect immediately, outside the scheduled set.
    fn play_effect(&mut self, buffer: AudioBuffer);
}

/// Placement of one buffer on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler<O> {
    output: O,
    sample_rate: u32,
    next_start_time: f64,
    scheduled: BTreeSet<BufferId>,
    next_id: BufferId,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self::with_sample_rate(output, pcm::PLAYBACK_SAMPLE_RATE)
    }

    pub fn with_sample_rate(output: O, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start_time: 0.0,
            scheduled: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Decodes a base64 payload and queues it after everything already queued.
    pub fn enqueue(&mut self, payload: &str) -> Result<Scheduled> {
        let buffer = pcm::decode(payload, self.sample_rate)?;
        Ok(self.schedule(buffer))
    }

    pub fn schedule(&mut self, buffer: AudioBuffer) -> Scheduled {
        let start_at = self.next_start_time.max(self.output.current_time());
        let duration = buffer.duration();
        let id = self.next_id;
        self.next_id += 1;

        self.output.start(id, buffer, start_at);
        self.next_start_time = start_at + duration;
        self.scheduled.insert(id);
        debug!(id, start_at, duration, queued = self.scheduled.len(), "Scheduled playback buffer");

        Scheduled {
            id,
            start_at,
            duration,
        }
    }

    /// Records the natural end of a buffer.
    ///
    /// Returns `true` when this completion emptied the scheduled set.
    /// Completions of buffers that were already cancelled are ignored.
    pub fn finished(&mut self, id: BufferId) -> bool {
        self.scheduled.remove(&id) && self.scheduled.is_empty()
    }

    /// Stops and forgets every scheduled buffer and rewinds the timeline.
    pub fn cancel_all(&mut self) {
        for id in std::mem::take(&mut self.scheduled) {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
        debug!("Cancelled all scheduled playback");
    }

    pub fn is_speaking(&self) -> bool {
        !self.scheduled.is_empty()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use mockall::predicate::eq;

    /// Records everything the scheduler asks of the device.
    #[derive(Default)]
    pub(crate) struct FakeOutput {
        pub now: f64,
        pub started: Vec<(BufferId, f64, f64)>,
        pub stopped: Vec<BufferId>,
        pub effects: usize,
    }

    impl AudioOutput for FakeOutput {
        fn current_time(&self) -> f64 {
            self.now
        }

        fn start(&mut self, id: BufferId, buffer: AudioBuffer, start_at: f64) {
            self.started.push((id, start_at, buffer.duration()));
        }

        fn stop(&mut self, id: BufferId) {
            self.stopped.push(id);
        }

        fn play_effect(&mut self, _buffer: AudioBuffer) {
            self.effects += 1;
        }
    }

    fn chunk(samples: usize) -> AudioBuffer {
        AudioBuffer::new(vec![0.0; samples], pcm::PLAYBACK_SAMPLE_RATE)
    }

    #[test]
    fn test_buffers_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        let lengths = [2400usize, 4800, 1200, 24_000, 7];

        let placed: Vec<Scheduled> = lengths.iter().map(|&n| scheduler.schedule(chunk(n))).collect();

        for pair in placed.windows(2) {
            assert!(pair[1].start_at >= pair[0].start_at);
            assert!(pair[1].start_at >= pair[0].start_at + pair[0].duration - 1e-9);
            assert_abs_diff_eq!(pair[1].start_at, pair[0].start_at + pair[0].duration, epsilon = 1e-9);
        }
        assert_eq!(scheduler.scheduled_len(), lengths.len());
        assert!(scheduler.is_speaking());
    }

    #[test]
    fn test_slow_producer_leaves_gap_but_never_starts_in_past() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        let first = scheduler.schedule(chunk(2400));
        assert_abs_diff_eq!(first.start_at, 0.0);

        // The output clock has run past the end of the first buffer.
        scheduler.output_mut().now = 1.0;
        let second = scheduler.schedule(chunk(2400));
        assert_abs_diff_eq!(second.start_at, 1.0);
        assert_abs_diff_eq!(scheduler.next_start_time(), 1.1, epsilon = 1e-9);
    }

    #[test]
    fn test_cancel_all_stops_everything_and_resets_baseline() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        scheduler.output_mut().now = 3.0;
        for _ in 0..3 {
            scheduler.schedule(chunk(24_000));
        }
        assert_abs_diff_eq!(scheduler.next_start_time(), 6.0, epsilon = 1e-9);

        scheduler.cancel_all();
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.output().stopped, vec![0, 1, 2]);

        // The next buffer starts at the live clock, not the stale 6.0.
        scheduler.output_mut().now = 3.5;
        let next = scheduler.schedule(chunk(2400));
        assert_abs_diff_eq!(next.start_at, 3.5);
    }

    #[test]
    fn test_speaking_tracks_completion() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        let a = scheduler.schedule(chunk(100));
        let b = scheduler.schedule(chunk(100));

        assert!(!scheduler.finished(a.id));
        assert!(scheduler.is_speaking());
        assert!(scheduler.finished(b.id));
        assert!(!scheduler.is_speaking());
    }

    #[test]
    fn test_late_completion_after_cancel_is_ignored() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        let stale = scheduler.schedule(chunk(100));
        scheduler.cancel_all();
        let fresh = scheduler.schedule(chunk(100));

        assert!(!scheduler.finished(stale.id));
        assert!(scheduler.is_speaking());
        assert!(scheduler.finished(fresh.id));
    }

    #[test]
    fn test_enqueue_rejects_malformed_payload_without_side_effects() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default());
        assert!(scheduler.enqueue("AAEC").is_err()); // three bytes
        assert!(!scheduler.is_speaking());
        assert!(scheduler.output().started.is_empty());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_cancel_stops_each_buffer_once() {
        let mut output = MockAudioOutput::new();
        output.expect_current_time().return_const(0.0);
        output.expect_start().times(2).return_const(());
        output.expect_stop().with(eq(0)).times(1).return_const(());
        output.expect_stop().with(eq(1)).times(1).return_const(());

        let mut scheduler = PlaybackScheduler::new(output);
        scheduler.schedule(chunk(10));
        scheduler.schedule(chunk(10));
        scheduler.cancel_all();
        scheduler.cancel_all();
    }
}
