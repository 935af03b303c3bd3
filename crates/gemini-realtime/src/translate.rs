//! Translation between Gemini Live messages and the provider-neutral event model.

use crate::types::{
    ClientMessage, FunctionCall, FunctionResponse, ServerMessage, ToolResponse, WireBlob,
    WireContent, WirePart,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use vox_core::{
    event::{AgentEvent, Blob, Content, Role},
    settings::CONTEXT_TOOL_NAME,
};

/// Gemini expects the sample rate on raw PCM input.
const DEFAULT_INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// The outcome of one server message: events for the bridge and any replies
/// that must go back to Gemini (tool responses).
#[derive(Debug, Default)]
pub struct Translation {
    pub events: Vec<AgentEvent>,
    pub replies: Vec<ClientMessage>,
}

/// Turns one server message into zero or more agent events.
///
/// Within a message, events are produced in this order: interruption, user
/// transcription, model turn parts, model transcription, context updates, and
/// finally the turn boundary.
pub fn translate(message: ServerMessage) -> Translation {
    let mut out = Translation::default();
    let mut turn_complete = false;

    if let Some(content) = message.server_content {
        if content.interrupted {
            out.events.push(AgentEvent::interrupted());
        }
        if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            out.events.push(AgentEvent::text(Role::User, t.text, true));
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(event) = part_to_event(part) {
                    out.events.push(event);
                }
            }
        }
        if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            out.events.push(AgentEvent::text(Role::Model, t.text, true));
        }
        turn_complete = content.turn_complete;
    }

    if let Some(tool_call) = message.tool_call {
        let mut responses = Vec::with_capacity(tool_call.function_calls.len());
        for call in tool_call.function_calls {
            let (event, response) = handle_function_call(call);
            out.events.extend(event);
            responses.push(response);
        }
        if !responses.is_empty() {
            out.replies.push(ClientMessage::ToolResponse(ToolResponse {
                function_responses: responses,
            }));
        }
    }

    if let Some(go_away) = message.go_away {
        warn!(time_left = ?go_away.time_left, "Gemini Live announced it will close the session.");
    }

    if turn_complete {
        out.events.push(AgentEvent::turn_complete());
    }
    out
}

fn part_to_event(part: WirePart) -> Option<AgentEvent> {
    if let Some(blob) = part.inline_data {
        return match BASE64.decode(blob.data.as_bytes()) {
            Ok(bytes) => Some(AgentEvent::audio(blob.mime_type, bytes)),
            Err(e) => {
                warn!(error = %e, mime_type = %blob.mime_type, "Skipping inline data with invalid base64.");
                None
            }
        };
    }
    part.text
        .filter(|t| !t.is_empty())
        .map(|text| AgentEvent::text(Role::Model, text, true))
}

fn handle_function_call(call: FunctionCall) -> (Option<AgentEvent>, FunctionResponse) {
    debug!(name = %call.name, "Gemini requested a function call.");
    if call.name != CONTEXT_TOOL_NAME {
        warn!(name = %call.name, "Gemini called an unknown function.");
        let response = json!({ "error": format!("Unknown function '{}'", call.name) });
        return (None, reply(call, response));
    }

    let key = call.args.get("key").and_then(Value::as_str).map(str::to_owned);
    let value = call.args.get("value").cloned();
    match (key, value) {
        (Some(key), Some(value)) if !key.is_empty() => {
            let mut entries = Map::new();
            entries.insert(key.clone(), value);
            let response = json!({ "result": format!("Context entry '{}' updated.", key) });
            (Some(AgentEvent::context_update(entries)), reply(call, response))
        }
        _ => {
            warn!(args = ?call.args, "Context update is missing `key` or `value`.");
            let response = json!({ "error": "Both `key` and `value` are required." });
            (None, reply(call, response))
        }
    }
}

fn reply(call: FunctionCall, response: Value) -> FunctionResponse {
    FunctionResponse {
        id: call.id,
        name: call.name,
        response,
    }
}

/// Encodes a content submission as a complete user turn.
pub fn content_message(content: &Content) -> ClientMessage {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let parts = content
        .parts
        .iter()
        .map(|p| WirePart {
            text: p.text.clone(),
            inline_data: p.inline_data.as_ref().map(|b| WireBlob {
                mime_type: b.mime_type.clone(),
                data: BASE64.encode(&b.data),
            }),
        })
        .collect();
    ClientMessage::ClientContent(crate::types::ClientContent {
        turns: vec![WireContent {
            role: Some(role.to_string()),
            parts,
        }],
        turn_complete: true,
    })
}

/// Encodes a realtime blob, adding the sample rate Gemini expects when the
/// client sent bare `audio/pcm`.
pub fn realtime_message(blob: &Blob) -> ClientMessage {
    let mime_type = if blob.mime_type == "audio/pcm" {
        DEFAULT_INPUT_AUDIO_MIME.to_string()
    } else {
        blob.mime_type.clone()
    };
    ClientMessage::RealtimeInput(crate::types::RealtimeInput {
        audio: WireBlob {
            mime_type,
            data: BASE64.encode(&blob.data),
        },
    })
}
