//! Client for the Gemini Live bidirectional streaming API.

pub mod client;
pub mod types;

pub use client::{LIVE_API_URL, LiveEvent, LiveSession};
pub use types::{ClientMessage, ServerMessage};
