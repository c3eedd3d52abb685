//! Countdown expiry and the repeating alarm.

use crate::hud::TimerState;
use crate::pcm::AudioBuffer;
use std::time::Duration;

/// Period of the expiry check.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Nominal spacing between alarm bursts once a timer has expired.
pub const ALERT_REPEAT_MILLIS: i64 = 2000;

// Ticks drift against the wall clock, so a repeat is due once most of the
// nominal spacing has elapsed rather than all of it.
const ALERT_TOLERANCE_MILLIS: i64 = 500;

/// Decides on each tick whether the alarm should sound.
///
/// The alarm fires on the first tick at or past the target and then roughly
/// every [`ALERT_REPEAT_MILLIS`] for as long as the same timer stays in place.
/// Replacing the timer rearms the clock.
#[derive(Debug, Default, Clone)]
pub struct AlarmClock {
    last_alert: Option<(TimerState, i64)>,
}

impl AlarmClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, timer: Option<&TimerState>, now_millis: i64) -> bool {
        let Some(timer) = timer else {
            self.last_alert = None;
            return false;
        };
        if now_millis < timer.target_epoch_millis {
            return false;
        }
        let due = match &self.last_alert {
            Some((alerted, at)) if alerted == timer => {
                now_millis - at >= ALERT_REPEAT_MILLIS - ALERT_TOLERANCE_MILLIS
            }
            _ => true,
        };
        if due {
            self.last_alert = Some((timer.clone(), now_millis));
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_alert = None;
    }
}

/// Synthesizes the alarm burst: a square wave stepping 880 Hz, 440 Hz,
/// 880 Hz every 100 ms under a 0.1 gain decaying exponentially over 500 ms.
pub fn alarm_tone(sample_rate: u32) -> AudioBuffer {
    const LENGTH_SECS: f64 = 0.5;
    const START_GAIN: f64 = 0.1;
    const END_GAIN: f64 = 0.000_01;

    let rate = f64::from(sample_rate);
    let total = (LENGTH_SECS * rate) as usize;
    let mut phase = 0.0f64;
    let samples = (0..total)
        .map(|i| {
            let t = i as f64 / rate;
            let frequency = if (0.1..0.2).contains(&t) { 440.0 } else { 880.0 };
            phase = (phase + frequency / rate).fract();
            let square = if phase < 0.5 { 1.0 } else { -1.0 };
            let gain = START_GAIN * (END_GAIN / START_GAIN).powf(t / LENGTH_SECS);
            (square * gain) as f32
        })
        .collect();
    AudioBuffer::new(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(target: i64, label: &str) -> TimerState {
        TimerState {
            target_epoch_millis: target,
            label: label.into(),
        }
    }

    #[test]
    fn test_silent_before_target_and_without_timer() {
        let mut clock = AlarmClock::new();
        assert!(!clock.tick(None, 10_000));
        assert!(!clock.tick(Some(&timer(10_000, "Pizza")), 9_999));
    }

    #[test]
    fn test_repeats_while_expired_until_replaced() {
        let mut clock = AlarmClock::new();
        let pizza = timer(10_000, "Pizza");

        // One-second ticks starting 300 ms after expiry.
        let fired: Vec<bool> = (0..8)
            .map(|i| clock.tick(Some(&pizza), 10_300 + i * 1000))
            .collect();
        assert!(fired[0]);
        assert!(fired.iter().filter(|&&f| f).count() >= 3);
        assert!(fired.windows(2).all(|w| !(w[0] && w[1])));

        // Never cleared by expiry alone: still firing a minute later.
        let late: Vec<bool> = (0..4)
            .map(|i| clock.tick(Some(&pizza), 70_000 + i * 1000))
            .collect();
        assert!(late.contains(&true));

        // A replacement timer in the future silences it.
        let tea = timer(200_000, "Tea");
        assert!(!clock.tick(Some(&tea), 75_000));
        assert!(!clock.tick(Some(&tea), 76_000));
    }

    #[test]
    fn test_jittery_ticks_still_repeat() {
        let mut clock = AlarmClock::new();
        let t = timer(0, "Alarm");
        assert!(clock.tick(Some(&t), 0));
        assert!(!clock.tick(Some(&t), 990));
        assert!(clock.tick(Some(&t), 1_995));
    }

    #[test]
    fn test_alarm_tone_shape() {
        let tone = alarm_tone(24_000);
        assert_eq!(tone.len(), 12_000);
        let peak = tone.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.1 + f32::EPSILON);
        let tail = tone.samples()[11_900..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail < 0.001);
    }
}
