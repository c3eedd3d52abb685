//! Error taxonomy shared by every stage of the audio session.

/// Failures surfaced by the session engine.
///
/// `CaptureUnavailable`, `PlaybackUnavailable` and `RemoteConnection` are fatal
/// to the current session. `MalformedAudio` is only ever reported for a single
/// chunk and is absorbed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JarvisError {
    #[error("Microphone unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("Audio output unavailable: {0}")]
    PlaybackUnavailable(String),
    #[error("Remote connection failed: {0}")]
    RemoteConnection(String),
    #[error("Malformed audio payload: {0}")]
    MalformedAudio(String),
    #[error("A session is already active")]
    SessionActive,
}

pub type Result<T, E = JarvisError> = std::result::Result<T, E>;
