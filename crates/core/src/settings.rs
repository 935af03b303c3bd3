//! Agent Settings Document
//!
//! The configuration a client hands over when it opens a conversation. It is
//! parsed once per connection and passed by value into session creation, so
//! one connection's settings can never leak into another's agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name of the function tool the agent uses to edit the shared context.
pub const CONTEXT_TOOL_NAME: &str = "edit_context_dict";

/// Errors raised while turning a raw JSON document into `SettingsDocument`.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings document does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("Settings field `{0}` must not be empty")]
    EmptyField(&'static str),
}

/// A single entry of the conversation context.
///
/// Only `value` is interpreted; everything else the client stores alongside
/// it (labels, placeholders, ordering hints) is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextEntry {
    /// Returns the value if it carries information worth giving to the agent.
    pub fn meaningful_value(&self) -> Option<&Value> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::Bool(false) => None,
            Value::Array(a) if a.is_empty() => None,
            Value::Object(o) if o.is_empty() => None,
            other => Some(other),
        }
    }
}

/// The per-connection agent configuration sent in the handshake envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    pub app_name: String,
    pub agent_description: String,
    pub goal_description: String,
    #[serde(default)]
    pub context_dict: BTreeMap<String, ContextEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    /// Overrides the server-wide provider key for this conversation only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_tool: Option<bool>,
    /// Fields used by other parts of the application (analysis, notes).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SettingsDocument {
    /// Parses and validates a raw settings document.
    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.app_name.trim().is_empty() {
            return Err(SettingsError::EmptyField("app_name"));
        }
        Ok(())
    }

    pub fn search_enabled(&self) -> bool {
        self.search_tool.unwrap_or(false)
    }

    /// The context entries that carry a meaningful value, keyed by name.
    pub fn context(&self) -> BTreeMap<&str, &Value> {
        self.context_dict
            .iter()
            .filter_map(|(k, entry)| entry.meaningful_value().map(|v| (k.as_str(), v)))
            .collect()
    }

    /// Renders the system instruction given to the agent.
    pub fn instruction(&self) -> String {
        let entries = self.context();
        let context = if entries.is_empty() {
            "(none yet)".to_string()
        } else {
            entries
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("- {k}: {s}"),
                    other => format!("- {k}: {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "You adapt to the needs of the person you are talking with.\n\n\
             Behave as follows: {}\n\n\
             Your goal: {}\n\n\
             Context of the conversation:\n{}\n\n\
             When you learn something that belongs in the context, call the \
             `{}` tool with the entry's key and its new value.",
            self.agent_description.trim(),
            self.goal_description.trim(),
            context,
            CONTEXT_TOOL_NAME,
        )
    }
}
