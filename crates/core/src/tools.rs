//! Tool calls issued by the speech model.
//!
//! The model can drive two tools: `update_screen` to fill one of the HUD
//! panels and `manage_timer` to start a countdown. Every request is answered
//! with exactly one response carrying the request id, whatever the outcome.

use crate::hud::{DisplayState, Panel, PanelContent, PanelKind, TimerState};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

pub const UPDATE_SCREEN: &str = "update_screen";
pub const MANAGE_TIMER: &str = "manage_timer";

/// A function call requested by the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The answer to one [`ToolCallRequest`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolCallResponse {
    fn result(call: &ToolCallRequest, message: &str) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: json!({ "result": message }),
        }
    }

    fn rejected(call: &ToolCallRequest, reason: String) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: json!({ "error": reason }),
        }
    }

    /// Whether the call was refused because of invalid arguments.
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// Content types the model may put on screen; `timer` is reserved for
/// `manage_timer`.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum ScreenKind {
    Text,
    Image,
    Map,
    Empty,
}

impl From<ScreenKind> for PanelKind {
    fn from(kind: ScreenKind) -> Self {
        match kind {
            ScreenKind::Text => PanelKind::Text,
            ScreenKind::Image => PanelKind::Image,
            ScreenKind::Map => PanelKind::Map,
            ScreenKind::Empty => PanelKind::Empty,
        }
    }
}

#[derive(Deserialize, Debug)]
struct UpdateScreenArgs {
    panel: Panel,
    #[serde(rename = "type")]
    kind: ScreenKind,
    title: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ManageTimerArgs {
    seconds: f64,
    label: String,
}

/// Applies tool calls to the display state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Handles a whole batch, answering every request in order.
    pub fn dispatch_all(
        &self,
        display: &mut DisplayState,
        calls: &[ToolCallRequest],
        now: DateTime<Utc>,
    ) -> Vec<ToolCallResponse> {
        calls
            .iter()
            .map(|call| self.dispatch(display, call, now))
            .collect()
    }

    pub fn dispatch(
        &self,
        display: &mut DisplayState,
        call: &ToolCallRequest,
        now: DateTime<Utc>,
    ) -> ToolCallResponse {
        match call.name.as_str() {
            UPDATE_SCREEN => match serde_json::from_value::<UpdateScreenArgs>(call.args.clone()) {
                Ok(args) => {
                    info!(id = %call.id, panel = ?args.panel, kind = ?args.kind, "Executing tool 'update_screen'");
                    update_screen(display, args);
                    ToolCallResponse::result(call, "Screen updated")
                }
                Err(e) => reject(call, format!("Invalid arguments: {e}")),
            },
            MANAGE_TIMER => match serde_json::from_value::<ManageTimerArgs>(call.args.clone()) {
                Ok(args) => {
                    info!(id = %call.id, seconds = args.seconds, label = %args.label, "Executing tool 'manage_timer'");
                    match manage_timer(display, args, now) {
                        Ok(()) => ToolCallResponse::result(call, "Timer set"),
                        Err(reason) => reject(call, reason),
                    }
                }
                Err(e) => reject(call, format!("Invalid arguments: {e}")),
            },
            other => {
                warn!(id = %call.id, name = %other, "Model called an unknown tool");
                ToolCallResponse::result(call, "Unknown tool")
            }
        }
    }
}

fn reject(call: &ToolCallRequest, reason: String) -> ToolCallResponse {
    warn!(id = %call.id, name = %call.name, %reason, "Rejected tool call");
    ToolCallResponse::rejected(call, reason)
}

fn update_screen(display: &mut DisplayState, args: UpdateScreenArgs) {
    display.set_panel(
        args.panel,
        PanelContent {
            title: args.title,
            kind: args.kind.into(),
            content: args.content,
        },
    );
}

/// Sets the countdown and shows it on the left panel as a single change.
fn manage_timer(
    display: &mut DisplayState,
    args: ManageTimerArgs,
    now: DateTime<Utc>,
) -> Result<(), String> {
    if !args.seconds.is_finite() || args.seconds < 0.0 {
        return Err(format!(
            "Invalid arguments: seconds must be a non-negative number, got {}",
            args.seconds
        ));
    }
    let target_epoch_millis = now
        .timestamp_millis()
        .checked_add((args.seconds * 1000.0).round() as i64)
        .ok_or_else(|| "Invalid arguments: timer target out of range".to_string())?;
    let target = DateTime::<Utc>::from_timestamp_millis(target_epoch_millis)
        .ok_or_else(|| "Invalid arguments: timer target out of range".to_string())?;

    display.timer = Some(TimerState {
        target_epoch_millis,
        label: args.label.clone(),
    });
    display.left = PanelContent {
        title: args.label,
        kind: PanelKind::Timer,
        content: target.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    Ok(())
}

/// Function declarations advertised to the model at setup time.
pub fn function_declarations() -> Vec<Value> {
    vec![
        json!({
            "name": UPDATE_SCREEN,
            "description": "Update or clear the HUD screens.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "panel": {
                        "type": "STRING",
                        "description": "Which panel to update: \"left\" (for text/info) or \"right\" (for images/maps).",
                        "enum": ["left", "right"]
                    },
                    "type": {
                        "type": "STRING",
                        "description": "Type of content.",
                        "enum": ["text", "image", "map", "empty"]
                    },
                    "title": {
                        "type": "STRING",
                        "description": "Short title for the display."
                    },
                    "content": {
                        "type": "STRING",
                        "description": "The content string."
                    }
                },
                "required": ["panel", "type", "title", "content"]
            }
        }),
        json!({
            "name": MANAGE_TIMER,
            "description": "Set a timer or alarm. Calculates the duration in seconds.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "seconds": {
                        "type": "NUMBER",
                        "description": "Duration of the timer in seconds."
                    },
                    "label": {
                        "type": "STRING",
                        "description": "Label for the timer (e.g. \"Pizza\", \"Alarm\")."
                    }
                },
                "required": ["seconds", "label"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_update_screen_replaces_only_target_panel() {
        let mut display = DisplayState::default();
        display.left = PanelContent {
            title: "Tony".into(),
            kind: PanelKind::Text,
            content: "Genius".into(),
        };
        let before_left = display.left.clone();

        let response = ToolDispatcher::new().dispatch(
            &mut display,
            &call(
                "c1",
                UPDATE_SCREEN,
                json!({"panel": "right", "type": "map", "title": "Paris", "content": "Paris, France"}),
            ),
            Utc::now(),
        );

        assert_eq!(response.id, "c1");
        assert_eq!(response.response, json!({"result": "Screen updated"}));
        assert_eq!(display.left, before_left);
        assert_eq!(
            display.right,
            PanelContent {
                title: "Paris".into(),
                kind: PanelKind::Map,
                content: "Paris, France".into(),
            }
        );
    }

    #[test]
    fn test_manage_timer_sets_timer_and_left_panel_together() {
        let t = 1_700_000_000_000;
        let mut display = DisplayState::default();

        let response = ToolDispatcher::new().dispatch(
            &mut display,
            &call("t1", MANAGE_TIMER, json!({"seconds": 5, "label": "Pizza"})),
            at(t),
        );

        assert_eq!(response.response, json!({"result": "Timer set"}));
        assert_eq!(
            display.timer,
            Some(TimerState {
                target_epoch_millis: t + 5000,
                label: "Pizza".into(),
            })
        );
        assert_eq!(display.left.kind, PanelKind::Timer);
        assert_eq!(display.left.title, "Pizza");
        assert_eq!(display.left.content, "2023-11-14T22:13:25.000Z");
        let shown = DateTime::parse_from_rfc3339(&display.left.content).unwrap();
        assert_eq!(shown.timestamp_millis(), t + 5000);
        assert_eq!(display.right, PanelContent::default());
    }

    #[test]
    fn test_new_timer_replaces_running_one() {
        let mut display = DisplayState::default();
        let dispatcher = ToolDispatcher::new();
        dispatcher.dispatch(&mut display, &call("a", MANAGE_TIMER, json!({"seconds": 60, "label": "Tea"})), at(0));
        dispatcher.dispatch(&mut display, &call("b", MANAGE_TIMER, json!({"seconds": 1.5, "label": "Eggs"})), at(10));

        let timer = display.timer.unwrap();
        assert_eq!(timer.label, "Eggs");
        assert_eq!(timer.target_epoch_millis, 1510);
    }

    #[test]
    fn test_every_request_gets_one_response() {
        let mut display = DisplayState::default();
        let calls = vec![
            call("1", UPDATE_SCREEN, json!({"panel": "left", "type": "text", "title": "A", "content": "B"})),
            call("2", "launch_missiles", json!({})),
            call("3", MANAGE_TIMER, json!({"seconds": "soon"})),
            call("4", MANAGE_TIMER, json!({"seconds": 3, "label": "Go"})),
        ];

        let responses = ToolDispatcher::new().dispatch_all(&mut display, &calls, at(0));

        assert_eq!(responses.len(), calls.len());
        for (request, response) in calls.iter().zip(&responses) {
            assert_eq!(request.id, response.id);
            assert_eq!(request.name, response.name);
        }
        assert_eq!(responses[1].response, json!({"result": "Unknown tool"}));
        assert!(responses[2].is_error());
        assert!(!responses[3].is_error());
    }

    #[test]
    fn test_out_of_enum_values_are_rejected_without_changes() {
        let mut display = DisplayState::default();
        let dispatcher = ToolDispatcher::new();

        let bad_panel = dispatcher.dispatch(
            &mut display,
            &call("x", UPDATE_SCREEN, json!({"panel": "center", "type": "text", "title": "", "content": ""})),
            at(0),
        );
        let timer_kind = dispatcher.dispatch(
            &mut display,
            &call("y", UPDATE_SCREEN, json!({"panel": "left", "type": "timer", "title": "", "content": ""})),
            at(0),
        );
        let negative = dispatcher.dispatch(
            &mut display,
            &call("z", MANAGE_TIMER, json!({"seconds": -4, "label": "Past"})),
            at(0),
        );

        assert!(bad_panel.is_error());
        assert!(timer_kind.is_error());
        assert!(negative.is_error());
        assert_eq!(display, DisplayState::default());
    }

    #[test]
    fn test_declarations_match_contract() {
        let declarations = function_declarations();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0]["name"], UPDATE_SCREEN);
        assert_eq!(
            declarations[0]["parameters"]["required"],
            json!(["panel", "type", "title", "content"])
        );
        assert_eq!(declarations[0]["parameters"]["properties"]["type"]["enum"], json!(["text", "image", "map", "empty"]));
        assert_eq!(declarations[1]["name"], MANAGE_TIMER);
        assert_eq!(declarations[1]["parameters"]["properties"]["seconds"]["type"], "NUMBER");
    }
}
