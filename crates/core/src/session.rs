//! The session controller.
//!
//! Owns the connection state machine and routes every event of a live
//! session: microphone frames go out, inbound messages are split between the
//! tool dispatcher and the playback scheduler, and the timer tick drives the
//! alarm. The controller performs no I/O itself; it returns the messages to
//! send and publishes presentation state through a `watch` channel, of which
//! it is the only writer.

use crate::capture::CapturePipeline;
use crate::error::JarvisError;
use crate::generic_types::{InboundMessage, Outbound};
use crate::hud::{ConnectionState, HudSnapshot};
use crate::pcm;
use crate::playback::{AudioOutput, BufferId, PlaybackScheduler};
use crate::timer::{AlarmClock, alarm_tone};
use crate::tools::ToolDispatcher;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct SessionController<O> {
    capture: CapturePipeline,
    scheduler: PlaybackScheduler<O>,
    tools: ToolDispatcher,
    alarm: AlarmClock,
    hud: watch::Sender<HudSnapshot>,
}

impl<O: AudioOutput> SessionController<O> {
    /// Creates the controller for a freshly opened connection, in the
    /// `Connecting` state until the service acknowledges the setup.
    pub fn new(output: O, hud: watch::Sender<HudSnapshot>) -> Self {
        hud.send_if_modified(|h| {
            let changed = h.connection != ConnectionState::Connecting || h.error.is_some();
            h.set_connection(ConnectionState::Connecting);
            h.error = None;
            changed
        });
        Self {
            capture: CapturePipeline::default(),
            scheduler: PlaybackScheduler::new(output),
            tools: ToolDispatcher::new(),
            alarm: AlarmClock::new(),
            hud,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.hud.borrow().connection
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    pub fn on_setup_complete(&mut self) {
        if self.state() != ConnectionState::Connecting {
            warn!(state = %self.state(), "Ignoring setup acknowledgment outside of handshake");
            return;
        }
        info!("Session open. Streaming microphone audio.");
        self.hud.send_modify(|h| h.set_connection(ConnectionState::Open));
    }

    /// Encodes a microphone frame for sending. Frames are dropped until the
    /// session is open.
    pub fn on_capture_frame(&mut self, frame: &[f32]) -> Option<Outbound> {
        if self.state() != ConnectionState::Open {
            debug!(samples = frame.len(), "Dropping capture frame before session is open");
            return None;
        }
        let captured = self.capture.process(frame);
        self.hud.send_if_modified(|h| {
            let changed = h.listening != captured.listening;
            h.listening = captured.listening;
            changed
        });
        Some(Outbound::RealtimeInput(captured.blob))
    }

    /// Handles one inbound message: tool calls first, then audio, then
    /// interruption. Returns the batched tool responses, if any.
    pub fn on_message(&mut self, message: InboundMessage, now: DateTime<Utc>) -> Option<Outbound> {
        if message.is_empty() {
            return None;
        }

        let mut reply = None;
        if !message.tool_calls.is_empty() {
            let tools = self.tools;
            let mut responses = Vec::new();
            self.hud.send_modify(|h| {
                responses = tools.dispatch_all(&mut h.display, &message.tool_calls, now);
            });
            reply = Some(Outbound::ToolResponse(responses));
        }

        for payload in &message.audio {
            self.set_speaking(true);
            if let Err(e) = self.scheduler.enqueue(payload) {
                warn!(error = %e, "Skipping undecodable audio chunk");
            }
            self.set_speaking(self.scheduler.is_speaking());
        }

        if message.interrupted {
            info!(queued = self.scheduler.scheduled_len(), "Model interrupted. Cancelling playback.");
            self.scheduler.cancel_all();
            self.set_speaking(false);
        }

        reply
    }

    /// Records that a scheduled buffer played to its end.
    pub fn on_playback_finished(&mut self, id: BufferId) {
        if self.scheduler.finished(id) {
            self.set_speaking(false);
        }
    }

    /// Runs one timer tick; returns whether the alarm sounded.
    pub fn on_tick(&mut self, now_millis: i64) -> bool {
        let timer = self.hud.borrow().display.timer.clone();
        let fire = self.alarm.tick(timer.as_ref(), now_millis);
        if fire {
            debug!(label = ?timer.map(|t| t.label), "Timer expired. Sounding alarm.");
            self.scheduler
                .output_mut()
                .play_effect(alarm_tone(pcm::PLAYBACK_SAMPLE_RATE));
        }
        fire
    }

    /// The service or the local side ended the session.
    pub fn on_closed(&mut self) {
        info!("Session closed.");
        self.halt(ConnectionState::Closed, None);
    }

    /// A fatal failure ended the session.
    pub fn on_error(&mut self, error: &JarvisError) {
        warn!(%error, "Session failed.");
        self.halt(ConnectionState::Error, Some(error.to_string()));
    }

    fn halt(&mut self, state: ConnectionState, error: Option<String>) {
        self.scheduler.cancel_all();
        self.alarm.reset();
        self.hud.send_modify(|h| {
            h.set_connection(state);
            h.listening = false;
            h.speaking = false;
            if error.is_some() {
                h.error = error;
            }
        });
    }

    fn set_speaking(&self, speaking: bool) {
        self.hud.send_if_modified(|h| {
            let changed = h.speaking != speaking;
            h.speaking = speaking;
            changed
        });
    }
}
