//! Axum Handlers for the REST API
//!
//! Session controls and read-only views of the presentation state.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use jarvis_core::{JarvisError, hud::HudSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::state::AppState;

/// JSON body returned with every error response.
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct SpectrumResponse {
    pub bins: Vec<u8>,
}

pub enum ApiError {
    Conflict(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Maps a refused or failed session start onto an HTTP status.
    pub fn from_session(err: JarvisError) -> Self {
        match err {
            JarvisError::SessionActive => ApiError::Conflict(err.to_string()),
            other => ApiError::ServiceUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Start a voice session. Responds with the state after the attempt.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HudSnapshot>, ApiError> {
    state.live.start().await?.map_err(ApiError::from_session)?;
    Ok(Json(state.hud.borrow().clone()))
}

/// Tear down the session, clear the display and start again.
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HudSnapshot>, ApiError> {
    state.live.reset().await?.map_err(ApiError::from_session)?;
    Ok(Json(state.hud.borrow().clone()))
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<HudSnapshot> {
    Json(state.hud.borrow().clone())
}

/// Current output frequency bins, 0..=255 each.
pub async fn get_spectrum(State(state): State<Arc<AppState>>) -> Json<SpectrumResponse> {
    Json(SpectrumResponse {
        bins: state.tap.snapshot(),
    })
}
