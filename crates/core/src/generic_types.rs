use crate::pcm::Blob;
use crate::tools::{ToolCallRequest, ToolCallResponse};

/// Generic configuration for opening a real-time session with any provider.
#[derive(Debug, Clone, Default)]
pub struct GenericSessionConfig {
    pub model: String,
    pub voice_name: String,
    pub instructions: String,
    /// Also let the model ground answers with web search.
    pub google_search: bool,
}

/// Provider-agnostic view of one message received from the speech service.
///
/// A single message may carry tool calls, audio and an interruption at once;
/// an empty message is a shape the session does not act on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub tool_calls: Vec<ToolCallRequest>,
    /// Base64 PCM16 chunks in arrival order.
    pub audio: Vec<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.audio.is_empty() && !self.interrupted
    }
}

/// Generic events that any real-time provider can emit back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericServerEvent {
    /// The service acknowledged the session setup.
    SetupComplete,
    Message(InboundMessage),
    /// The connection was closed, with the peer's reason if it gave one.
    Closed(Option<String>),
    /// The transport failed.
    Error(String),
}

/// Messages the session sends to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    RealtimeInput(Blob),
    ToolResponse(Vec<ToolCallResponse>),
}
