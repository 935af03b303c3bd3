//! Connection handshake: the first client envelope must carry the settings
//! document, from which an agent session is created.

use super::protocol::{self, ClientEnvelope, Inbound};
use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info};
use vox_core::{
    session::{MediaMode, Session, SessionFactory},
    settings::{SettingsDocument, SettingsError},
};

/// Why a connection never got an agent session.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("client disconnected before sending settings")]
    Disconnected,
    #[error("first message must be a text frame")]
    NotText,
    #[error("first message is not a valid envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("first message must be `settings`, got `{0}`")]
    UnexpectedType(String),
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error("failed to start agent session: {0:#}")]
    SessionCreation(#[source] anyhow::Error),
}

/// Reads the handshake envelope and creates the connection's agent session.
///
/// Control frames before the first envelope are skipped. Nothing is read
/// past the handshake.
pub async fn negotiate<R, E>(
    reader: &mut R,
    sessions: &dyn SessionFactory,
    user_id: &str,
    mode: MediaMode,
) -> Result<Session, NegotiationError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let text = loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => return Err(NegotiationError::NotText),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                return Err(NegotiationError::Disconnected);
            }
        }
    };

    let raw_settings = match protocol::decode(text.as_str()) {
        Inbound::Envelope(ClientEnvelope::Settings { settings }) => settings,
        Inbound::Envelope(other) => {
            return Err(NegotiationError::UnexpectedType(other.tag().to_string()));
        }
        Inbound::Unrecognized(tag) => {
            return Err(NegotiationError::UnexpectedType(
                tag.unwrap_or_else(|| "<none>".to_string()),
            ));
        }
        Inbound::Malformed(e) => return Err(NegotiationError::Malformed(e)),
    };

    let settings = SettingsDocument::from_value(raw_settings)?;
    debug!(app_name = %settings.app_name, "Settings received.");

    let agent = sessions
        .create_session(user_id, &settings, mode)
        .await
        .map_err(NegotiationError::SessionCreation)?;
    info!(app_name = %settings.app_name, "Agent session created.");

    Ok(Session::new(agent, mode, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::json;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use vox_core::{
        event::{Blob, Content},
        session::{AgentSession, InputSink},
    };

    struct NullSink;

    #[async_trait]
    impl InputSink for NullSink {
        async fn send_content(&self, _content: Content) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_realtime(&self, _blob: Blob) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        async fn create_session(
            &self,
            _user_id: &str,
            _settings: &SettingsDocument,
            _mode: MediaMode,
        ) -> anyhow::Result<AgentSession> {
            if self.fail {
                return Err(anyhow!("provider unavailable"));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(AgentSession {
                events: stream::empty().boxed(),
                input: Arc::new(NullSink),
            })
        }
    }

    fn frames(texts: Vec<Message>) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        stream::iter(texts.into_iter().map(Ok))
    }

    fn settings_frame() -> Message {
        let envelope = json!({
            "type": "settings",
            "settings": {
                "app_name": "language_pal",
                "agent_description": "A tutor.",
                "goal_description": "Practice."
            }
        });
        Message::Text(envelope.to_string().into())
    }

    #[tokio::test]
    async fn test_settings_envelope_creates_session() {
        let factory = CountingFactory::default();
        let mut reader = frames(vec![Message::Ping(Default::default()), settings_frame()]);

        let session = negotiate(&mut reader, &factory, "42", MediaMode::Audio)
            .await
            .unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(session.mode, MediaMode::Audio);
        assert_eq!(session.settings.app_name, "language_pal");
    }

    #[tokio::test]
    async fn test_non_settings_first_envelope_is_rejected() {
        let factory = CountingFactory::default();
        let mut reader = frames(vec![Message::Text(
            r#"{"type":"text","mime_type":"text/plain","data":"Hello"}"#.into(),
        )]);

        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::UnexpectedType(ref t) if t == "text"));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let factory = CountingFactory::default();
        let mut reader = frames(vec![Message::Text(
            r#"{"type":"settings","settings":{"app_name":"x"}}"#.into(),
        )]);

        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::InvalidSettings(_)));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_and_binary_first_frames() {
        let factory = CountingFactory::default();

        let mut reader = frames(vec![Message::Text("{oops".into())]);
        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Malformed(_)));

        let mut reader = frames(vec![Message::Binary(vec![1, 2, 3].into())]);
        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NotText));
    }

    #[tokio::test]
    async fn test_disconnect_before_settings() {
        let factory = CountingFactory::default();
        let mut reader = frames(vec![]);
        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Disconnected));
    }

    #[tokio::test]
    async fn test_session_creation_failure_is_reported() {
        let factory = CountingFactory {
            fail: true,
            ..Default::default()
        };
        let mut reader = frames(vec![settings_frame()]);
        let err = negotiate(&mut reader, &factory, "42", MediaMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::SessionCreation(_)));
        assert!(err.to_string().contains("provider unavailable"));
    }
}
