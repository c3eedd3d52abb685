//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the application: the session
//! controls, the presentation state endpoints and the HUD WebSocket.

use crate::{handlers, state::AppState, ws::ws_handler};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/session/start", post(handlers::start_session))
        .route("/session/reset", post(handlers::reset_session))
        .route("/state", get(handlers::get_state))
        .route("/spectrum", get(handlers::get_spectrum))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}
