use super::{Command, provider};
use crate::{
    config::Config,
    devices::{AudioDevices, SystemAudio},
};
use chrono::Utc;
use gemini_realtime::{LiveEvent, LiveSession};
use jarvis_core::{
    JarvisError,
    generic_types::{GenericServerEvent, GenericSessionConfig},
    hud::{ConnectionState, HudSnapshot},
    playback::BufferId,
    session::SessionController,
    spectrum::FrequencyTap,
    timer::TICK_INTERVAL,
};
use secrecy::ExposeSecret;
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, instrument, warn};

/// Capture frames buffered between the microphone and the loop (~2 s).
const FRAME_QUEUE: usize = 8;

/// Everything that exists only while a session is live. Dropping it
/// releases the microphone, the output device and the connection.
struct ActiveSession<D: AudioDevices> {
    controller: SessionController<D::Output>,
    remote: LiveSession,
    frames: mpsc::Receiver<Vec<f32>>,
    ended: mpsc::UnboundedReceiver<BufferId>,
    _microphone: D::Capture,
}

enum SessionInput {
    Remote(Option<LiveEvent>),
    PlaybackEnded(BufferId),
    Frame(Vec<f32>),
}

/// Owns the live session and processes, one at a time, commands, capture
/// frames, remote events, playback completions and the timer tick.
///
/// Device streams are not `Send`, so the engine runs on the main task of a
/// current-thread runtime.
pub struct LiveEngine<D: AudioDevices = SystemAudio> {
    config: Arc<Config>,
    session_config: GenericSessionConfig,
    hud: watch::Sender<HudSnapshot>,
    tap: FrequencyTap,
    devices: D,
    active: Option<ActiveSession<D>>,
}

impl<D: AudioDevices> LiveEngine<D> {
    pub fn new(
        config: Arc<Config>,
        instructions: String,
        hud: watch::Sender<HudSnapshot>,
        tap: FrequencyTap,
        devices: D,
    ) -> Self {
        let session_config = GenericSessionConfig {
            model: config.model.clone(),
            voice_name: config.voice_name.clone(),
            instructions,
            google_search: config.google_search,
        };
        Self {
            config,
            session_config,
            hud,
            tap,
            devices,
            active: None,
        }
    }

    /// Runs until `shutdown` resolves or every [`super::LiveHandle`] is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: impl Future<Output = ()>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                input = next_input(&mut self.active) => self.handle_input(input).await,
                _ = tick.tick() => self.handle_tick(),
            }
        }

        self.teardown().await;
        info!("Live session engine stopped.");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Reset(reply) => {
                let result = self.reset().await;
                let _ = reply.send(result);
            }
        }
    }

    #[instrument(name = "session_start", skip(self), fields(model = %self.session_config.model))]
    async fn start(&mut self) -> Result<(), JarvisError> {
        let state = self.hud.borrow().connection;
        if state.is_active() {
            warn!(%state, "Start refused, a session is already active.");
            return Err(JarvisError::SessionActive);
        }

        match self.open_session().await {
            Ok(session) => {
                self.active = Some(session);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start session");
                self.hud.send_modify(|h| {
                    h.set_connection(ConnectionState::Error);
                    h.listening = false;
                    h.speaking = false;
                    h.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Enters `Connecting`, acquires the output and input devices, then
    /// connects.
    async fn open_session(&mut self) -> Result<ActiveSession<D>, JarvisError> {
        self.hud.send_modify(|h| {
            h.set_connection(ConnectionState::Connecting);
            h.error = None;
        });

        let (output, ended) = self.devices.open_output(self.tap.clone())?;
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let microphone = self.devices.open_capture(frame_tx)?;
        let controller = SessionController::new(output, self.hud.clone());

        info!("Devices acquired. Connecting to Gemini Live...");
        let remote = LiveSession::connect(
            &self.config.live_api_url,
            self.config.gemini_api_key.expose_secret(),
            provider::setup(&self.session_config),
        )
        .await
        .map_err(|e| JarvisError::RemoteConnection(format!("{e:#}")))?;

        Ok(ActiveSession {
            controller,
            remote,
            frames,
            ended,
            _microphone: microphone,
        })
    }

    async fn reset(&mut self) -> Result<(), JarvisError> {
        info!("Resetting session and display.");
        self.teardown().await;
        self.hud.send_replace(HudSnapshot::default());
        self.start().await
    }

    async fn handle_input(&mut self, input: SessionInput) {
        let Some(session) = self.active.as_mut() else {
            return;
        };

        match input {
            SessionInput::Frame(frame) => {
                if let Some(outbound) = session.controller.on_capture_frame(&frame) {
                    if session
                        .remote
                        .try_send(provider::to_client_message(outbound))
                        .is_err()
                    {
                        debug!("Outbound buffer full, dropping capture frame");
                    }
                }
            }
            SessionInput::PlaybackEnded(id) => session.controller.on_playback_finished(id),
            SessionInput::Remote(event) => match provider::to_generic_event(event) {
                Some(GenericServerEvent::SetupComplete) => session.controller.on_setup_complete(),
                Some(GenericServerEvent::Message(message)) => {
                    let Some(reply) = session.controller.on_message(message, Utc::now()) else {
                        return;
                    };
                    if let Err(e) = session.remote.send(provider::to_client_message(reply)).await {
                        self.fail(JarvisError::RemoteConnection(format!("{e:#}")));
                    }
                }
                Some(GenericServerEvent::Closed(reason)) => {
                    info!(?reason, "Gemini closed the session.");
                    session.controller.on_closed();
                    self.release();
                }
                Some(GenericServerEvent::Error(message)) => {
                    self.fail(JarvisError::RemoteConnection(message));
                }
                None => {}
            },
        }
    }

    fn handle_tick(&mut self) {
        if let Some(session) = self.active.as_mut() {
            session.controller.on_tick(Utc::now().timestamp_millis());
        }
    }

    fn fail(&mut self, error: JarvisError) {
        if let Some(session) = self.active.as_mut() {
            session.controller.on_error(&error);
        }
        self.release();
    }

    fn release(&mut self) {
        if self.active.take().is_some() {
            self.tap.clear();
            debug!("Session devices released.");
        }
    }

    /// Releases devices first, then closes the connection politely.
    async fn teardown(&mut self) {
        if let Some(session) = self.active.take() {
            let ActiveSession {
                controller,
                remote,
                _microphone: microphone,
                ..
            } = session;
            drop(microphone);
            drop(controller);
            remote.close().await;
            debug!("Session torn down.");
        }
        self.tap.clear();
    }
}

/// Waits for the next input of the active session; pends forever when idle.
async fn next_input<D: AudioDevices>(active: &mut Option<ActiveSession<D>>) -> SessionInput {
    let Some(session) = active.as_mut() else {
        return std::future::pending().await;
    };
    tokio::select! {
        biased;
        event = session.remote.next_event() => SessionInput::Remote(event),
        Some(id) = session.ended.recv() => SessionInput::PlaybackEnded(id),
        Some(frame) = session.frames.recv() => SessionInput::Frame(frame),
    }
}
