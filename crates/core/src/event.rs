//! Provider-neutral model of what an agent session emits and accepts.
//!
//! Any live provider translates its own wire format into these types, so the
//! bridge never has to know which backend produced an event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who authored a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human on the other end of the connection.
    User,
    /// The agent.
    Model,
}

/// Inline binary data tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// True for raw PCM audio, with or without a `;rate=` parameter.
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }
}

/// One part of a content unit: text, an inline blob, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn blob(blob: Blob) -> Self {
        Self {
            text: None,
            inline_data: Some(blob),
        }
    }
}

/// A unit of conversation content authored by a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// A single-part text message from the user.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn first_part(&self) -> Option<&Part> {
        self.parts.first()
    }
}

/// One increment of the agent's turn, as produced by a session's event source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentEvent {
    pub content: Option<Content>,
    /// Set when the text carried here is an incremental, not-yet-final piece.
    pub partial: bool,
    pub turn_complete: bool,
    pub interrupted: bool,
    /// Key/value pairs the agent asked the client to persist.
    pub context_update: Option<Map<String, Value>>,
}

impl AgentEvent {
    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }

    pub fn text(role: Role, text: impl Into<String>, partial: bool) -> Self {
        Self {
            content: Some(Content {
                role,
                parts: vec![Part::text(text)],
            }),
            partial,
            ..Default::default()
        }
    }

    /// Audio produced by the agent.
    pub fn audio(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content: Some(Content {
                role: Role::Model,
                parts: vec![Part::blob(Blob::new(mime_type, data))],
            }),
            partial: true,
            ..Default::default()
        }
    }

    pub fn context_update(entries: Map<String, Value>) -> Self {
        Self {
            context_update: Some(entries),
            ..Default::default()
        }
    }

    /// Role of the carried content, if any.
    pub fn role(&self) -> Option<Role> {
        self.content.as_ref().map(|c| c.role)
    }

    pub fn first_part(&self) -> Option<&Part> {
        self.content.as_ref().and_then(Content::first_part)
    }
}
