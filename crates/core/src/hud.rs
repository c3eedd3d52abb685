//! State published to the presentation layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two display slots.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Text,
    Image,
    Map,
    Timer,
    #[default]
    Empty,
}

/// Content of a single panel. Always replaced as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelContent {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: PanelKind,
    /// Text, image URL, map query, or an ISO-8601 instant for timers.
    pub content: String,
}

/// The single active countdown.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub target_epoch_millis: i64,
    pub label: String,
}

/// Everything tool calls are allowed to change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayState {
    pub left: PanelContent,
    pub right: PanelContent,
    pub timer: Option<TimerState>,
}

impl DisplayState {
    pub fn set_panel(&mut self, panel: Panel, content: PanelContent) {
        match panel {
            Panel::Left => self.left = content,
            Panel::Right => self.right = content,
        }
    }
}

/// Lifecycle of the connection to the speech service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionState {
    /// Connecting or open: a second start must be refused.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the assistant as seen by the presentation layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct HudSnapshot {
    pub connection: ConnectionState,
    pub connected: bool,
    pub listening: bool,
    pub speaking: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub display: DisplayState,
}

impl HudSnapshot {
    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        self.connected = state == ConnectionState::Open;
    }
}
