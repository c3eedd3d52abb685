//! Live voice sessions.
//!
//! - `provider`: maps between the generic session types and the Gemini Live
//!   wire format.
//! - `engine`: the single event loop that owns the devices, the connection
//!   and the session controller.
//!
//! Other tasks talk to the engine only through a [`LiveHandle`].

mod engine;
pub mod provider;

pub use engine::LiveEngine;

use anyhow::{Context, anyhow};
use jarvis_core::JarvisError;
use tokio::sync::{mpsc, oneshot};

pub type Reply = oneshot::Sender<Result<(), JarvisError>>;

/// External inputs of the engine.
#[derive(Debug)]
pub enum Command {
    /// Start a session. Refused while one is connecting or open.
    Start(Reply),
    /// Tear everything down, clear the display and start afresh.
    Reset(Reply),
}

/// Cloneable sender side of the engine's command queue.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    commands: mpsc::Sender<Command>,
}

impl LiveHandle {
    pub fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    /// Requests a session start. The outer error means the engine is gone;
    /// the inner one is the engine's verdict.
    pub async fn start(&self) -> anyhow::Result<Result<(), JarvisError>> {
        self.request(Command::Start).await
    }

    pub async fn reset(&self) -> anyhow::Result<Result<(), JarvisError>> {
        self.request(Command::Reset).await
    }

    async fn request(
        &self,
        command: fn(Reply) -> Command,
    ) -> anyhow::Result<Result<(), JarvisError>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| anyhow!("Live session engine has stopped"))?;
        rx.await.context("Live session engine dropped the request")
    }
}
