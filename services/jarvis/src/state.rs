//! Shared Application State
//!
//! This module defines the `AppState` struct handed to every HTTP handler:
//! the engine's command handle and read-only views of the presentation state.

use crate::live::LiveHandle;
use jarvis_core::{hud::HudSnapshot, spectrum::FrequencyTap};
use tokio::sync::watch;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub live: LiveHandle,
    pub hud: watch::Receiver<HudSnapshot>,
    pub tap: FrequencyTap,
}
