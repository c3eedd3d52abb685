//! Jarvis Service Library Crate
//!
//! This library wires the device-independent session logic of `jarvis-core`
//! to real audio devices and the Gemini Live API, and exposes the session
//! controls and presentation state over HTTP. The `jarvis` binary is a thin
//! wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod devices;
pub mod handlers;
pub mod live;
pub mod router;
pub mod state;
pub mod ws;
