//! Translation between the generic session types and the Gemini Live wire
//! format.

use gemini_realtime::{
    ClientMessage, LiveEvent, ServerMessage,
    types::{
        BidiGenerateContentRealtimeInput, BidiGenerateContentSetup,
        BidiGenerateContentToolResponse, Blob, Content, FunctionResponse, GenerationConfig,
        GoogleSearch, Part, ResponseModality, SpeechConfig, Tool,
    },
};
use jarvis_core::{
    generic_types::{GenericServerEvent, GenericSessionConfig, InboundMessage, Outbound},
    tools::{ToolCallRequest, function_declarations},
};
use tracing::{debug, info, warn};

/// Builds the `setup` message declaring audio output, the voice, the system
/// instruction and the HUD tools.
pub fn setup(config: &GenericSessionConfig) -> BidiGenerateContentSetup {
    let mut tools = Vec::new();
    if config.google_search {
        tools.push(Tool {
            google_search: Some(GoogleSearch {}),
            ..Default::default()
        });
    }
    tools.push(Tool {
        function_declarations: Some(function_declarations()),
        ..Default::default()
    });

    let system_instruction = (!config.instructions.trim().is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: config.instructions.clone(),
        }],
    });

    BidiGenerateContentSetup {
        model: config.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig::prebuilt(config.voice_name.clone())),
        },
        system_instruction,
        tools,
    }
}

pub fn to_client_message(outbound: Outbound) -> ClientMessage {
    match outbound {
        Outbound::RealtimeInput(blob) => {
            ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
                audio: Blob {
                    mime_type: blob.mime_type,
                    data: blob.data,
                },
            })
        }
        Outbound::ToolResponse(responses) => {
            ClientMessage::ToolResponse(BidiGenerateContentToolResponse {
                function_responses: responses
                    .into_iter()
                    .map(|r| FunctionResponse {
                        id: r.id,
                        name: r.name,
                        response: r.response,
                    })
                    .collect(),
            })
        }
    }
}

/// Maps a connection event onto the generic vocabulary. A closed event
/// channel means the connection is gone. Returns `None` for messages the
/// session does not act on.
pub fn to_generic_event(event: Option<LiveEvent>) -> Option<GenericServerEvent> {
    match event {
        None => Some(GenericServerEvent::Closed(None)),
        Some(LiveEvent::Closed(reason)) => Some(GenericServerEvent::Closed(reason)),
        Some(LiveEvent::Error(message)) => Some(GenericServerEvent::Error(message)),
        Some(LiveEvent::Message(message)) => from_server_message(message),
    }
}

fn from_server_message(message: ServerMessage) -> Option<GenericServerEvent> {
    if let Some(go_away) = &message.go_away {
        warn!(time_left = ?go_away.time_left, "Gemini announced the connection will close");
    }
    if let Some(cancellation) = &message.tool_call_cancellation {
        info!(ids = ?cancellation.ids, "Ignoring tool call cancellation");
    }
    if message.setup_complete.is_some() {
        return Some(GenericServerEvent::SetupComplete);
    }

    let audio: Vec<String> = message.audio_payloads().map(str::to_owned).collect();
    let (interrupted, turn_complete) = message
        .server_content
        .as_ref()
        .map(|c| (c.interrupted, c.turn_complete))
        .unwrap_or_default();
    let tool_calls = message
        .tool_call
        .map(|call| {
            call.function_calls
                .into_iter()
                .map(|f| ToolCallRequest {
                    id: f.id,
                    name: f.name,
                    args: f.args,
                })
                .collect()
        })
        .unwrap_or_default();

    let inbound = InboundMessage {
        tool_calls,
        audio,
        interrupted,
        turn_complete,
    };
    if inbound.is_empty() {
        if turn_complete {
            debug!("Model turn complete.");
        }
        return None;
    }
    Some(GenericServerEvent::Message(inbound))
}
