//! Agent events to client envelopes.

use super::{RelayError, protocol::ServerEnvelope};
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{fmt::Display, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use vox_core::event::{AgentEvent, Role};

/// Maps one agent event to the envelope the client should see, if any.
///
/// Turn boundaries win over everything else on the same event, so content
/// riding on a `turn_complete` event is not forwarded.
pub fn classify(event: &AgentEvent) -> Option<ServerEnvelope> {
    if event.turn_complete || event.interrupted {
        return Some(ServerEnvelope::turn_complete(
            event.turn_complete,
            event.interrupted,
        ));
    }

    if let Some(context) = &event.context_update {
        return Some(ServerEnvelope::context_updated(context.clone()));
    }

    let part = event.first_part()?;

    if let Some(blob) = &part.inline_data {
        if blob.is_pcm_audio() && !blob.data.is_empty() {
            return Some(ServerEnvelope::audio(&blob.data));
        }
    }

    let text = part.text.as_deref().filter(|t| !t.is_empty())?;
    match event.role()? {
        Role::User => Some(ServerEnvelope::input_transcription(text)),
        Role::Model if event.partial => Some(ServerEnvelope::output_transcription(text)),
        Role::Model => None,
    }
}

/// Serializes an envelope and writes it as one text frame.
pub async fn send_envelope<W>(writer: &mut W, envelope: &ServerEnvelope) -> Result<(), RelayError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let serialized = serde_json::to_string(envelope)?;
    writer
        .send(Message::Text(serialized.into()))
        .await
        .map_err(|e| RelayError::Disconnected(e.to_string()))
}

/// Drains the agent event stream into the client connection.
///
/// Each write is awaited before the next event is pulled. When the stream
/// ends the writer is closed, which sends the close frame. On any other exit
/// closing the writer is left to the owner of `writer`.
pub async fn relay<S, W>(mut events: S, writer: Arc<Mutex<W>>) -> Result<(), RelayError>
where
    S: Stream<Item = anyhow::Result<AgentEvent>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut forwarded = 0usize;
    while let Some(event) = events.next().await {
        let event = event.map_err(RelayError::AgentStream)?;
        match classify(&event) {
            Some(envelope) => {
                trace!(?envelope, "Forwarding agent event.");
                send_envelope(&mut *writer.lock().await, &envelope).await?;
                forwarded += 1;
            }
            None => trace!(?event, "Agent event has nothing for the client."),
        }
    }

    debug!(forwarded, "Agent event stream ended. Closing client connection.");
    writer
        .lock()
        .await
        .close()
        .await
        .map_err(|e| RelayError::Disconnected(e.to_string()))
}
