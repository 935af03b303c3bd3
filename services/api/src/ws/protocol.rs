//! Defines the WebSocket message protocol between the browser client and the API server.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TEXT_MIME: &str = "text/plain";
pub const AUDIO_MIME: &str = "audio/pcm";

fn text_mime() -> String {
    TEXT_MIME.to_string()
}

fn audio_mime() -> String {
    AUDIO_MIME.to_string()
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// The agent configuration. Must be the first message of a connection.
    Settings { settings: Value },
    /// A typed message from the user.
    Text {
        #[serde(default = "text_mime")]
        mime_type: String,
        data: String,
    },
    /// A chunk of base64-encoded PCM audio from the user's microphone.
    Audio {
        #[serde(default = "audio_mime")]
        mime_type: String,
        data: String,
    },
}

impl ClientEnvelope {
    const TAGS: [&'static str; 3] = ["settings", "text", "audio"];

    pub fn tag(&self) -> &'static str {
        match self {
            ClientEnvelope::Settings { .. } => "settings",
            ClientEnvelope::Text { .. } => "text",
            ClientEnvelope::Audio { .. } => "audio",
        }
    }
}

/// The result of decoding one inbound text frame.
///
/// Only `Envelope` carries something to act on; the other two are dropped
/// with a warning and never end the connection.
#[derive(Debug)]
pub enum Inbound {
    Envelope(ClientEnvelope),
    /// Valid JSON whose `type` is missing or unknown.
    Unrecognized(Option<String>),
    /// Not JSON, or a known `type` whose fields don't fit.
    Malformed(serde_json::Error),
}

/// Decodes a client frame.
pub fn decode(text: &str) -> Inbound {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Inbound::Malformed(e),
    };
    let tag = value.get("type").and_then(Value::as_str);
    match tag {
        Some(tag) if ClientEnvelope::TAGS.contains(&tag) => match serde_json::from_value(value) {
            Ok(envelope) => Inbound::Envelope(envelope),
            Err(e) => Inbound::Malformed(e),
        },
        other => Inbound::Unrecognized(other.map(str::to_owned)),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
}

/// Messages sent from the server to the client (browser).
///
/// Most variants are identified by their field names rather than a `type`
/// tag; the browser client dispatches on which key is present.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerEnvelope {
    /// The agent finished or was interrupted mid-turn.
    TurnComplete { turn_complete: bool, interrupted: bool },
    /// A chunk of the agent's voice (base64 encoded PCM).
    AgentAudio { mime_type: String, data: String },
    /// Text recognised from the user's audio.
    InputTranscription { input_transcription: Transcription },
    /// Partial text produced by the agent.
    OutputTranscription { output_transcription: Transcription },
    Notice(Notice),
}

/// Server messages that carry an explicit `type` tag.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// Context entries the agent wants the client to persist.
    ContextUpdated { context_dict: Map<String, Value> },
    /// Reports why the handshake was rejected.
    Error { message: String },
}

impl ServerEnvelope {
    pub fn turn_complete(turn_complete: bool, interrupted: bool) -> Self {
        Self::TurnComplete {
            turn_complete,
            interrupted,
        }
    }

    pub fn audio(pcm: &[u8]) -> Self {
        Self::AgentAudio {
            mime_type: AUDIO_MIME.to_string(),
            data: BASE64.encode(pcm),
        }
    }

    pub fn input_transcription(text: impl Into<String>) -> Self {
        Self::InputTranscription {
            input_transcription: Transcription { text: text.into() },
        }
    }

    pub fn output_transcription(text: impl Into<String>) -> Self {
        Self::OutputTranscription {
            output_transcription: Transcription { text: text.into() },
        }
    }

    pub fn context_updated(context_dict: Map<String, Value>) -> Self {
        Self::Notice(Notice::ContextUpdated { context_dict })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Notice(Notice::Error {
            message: message.into(),
        })
    }
}
