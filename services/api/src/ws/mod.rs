//! WebSocket Session Bridge
//!
//! Everything that happens on one `/ws/{user_id}` connection:
//!
//! - `protocol`: the JSON envelopes exchanged with the browser.
//! - `negotiate`: the settings handshake that creates the agent session.
//! - `outbound`: agent events to client envelopes.
//! - `inbound`: client envelopes to the agent's input sink.
//! - `session`: runs both relays and tears the connection down.

pub mod inbound;
pub mod negotiate;
pub mod outbound;
pub mod protocol;
pub mod session;

pub use session::ws_handler;

/// Why a relay task stopped before its natural end.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The client connection went away. Not a failure.
    #[error("client connection closed: {0}")]
    Disconnected(String),
    #[error("agent event stream failed: {0:#}")]
    AgentStream(#[source] anyhow::Error),
    #[error("agent input sink rejected a message: {0:#}")]
    InputSink(#[source] anyhow::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::Disconnected(_))
    }
}
