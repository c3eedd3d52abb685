//! Jarvis Core
//!
//! Device- and transport-independent logic of the real-time voice session:
//! the PCM wire codec, capture level detection, gapless playback scheduling,
//! tool-call dispatch onto the HUD, the timer alarm and the session state
//! machine tying them together.

pub mod capture;
pub mod error;
pub mod generic_types;
pub mod hud;
pub mod pcm;
pub mod playback;
pub mod session;
pub mod spectrum;
pub mod timer;
pub mod tools;

pub use error::JarvisError;
