//! Client envelopes to the agent's input sink.

use super::{
    RelayError,
    protocol::{self, ClientEnvelope, Inbound},
};
use axum::extract::ws::Message;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use tracing::{debug, trace, warn};
use vox_core::{
    event::{Blob, Content},
    session::InputHandle,
};

/// Reads client frames until the peer goes away, forwarding each envelope's
/// payload to the agent.
///
/// Malformed or unrecognized envelopes are dropped with a warning. This
/// function never closes `input`.
pub async fn relay<R, E>(mut reader: R, input: InputHandle) -> Result<(), RelayError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let text = match reader.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => {
                warn!(len = data.len(), "Dropping binary frame; audio must be sent as an envelope.");
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("close frame {} {}", f.code, f.reason.as_str()))
                    .unwrap_or_else(|| "close frame".to_string());
                return Err(RelayError::Disconnected(reason));
            }
            Some(Err(e)) => return Err(RelayError::Disconnected(e.to_string())),
            None => return Err(RelayError::Disconnected("stream ended".to_string())),
        };

        match protocol::decode(text.as_str()) {
            Inbound::Envelope(envelope) => dispatch(envelope, &input).await?,
            Inbound::Unrecognized(tag) => {
                warn!(tag = tag.as_deref().unwrap_or("<none>"), "Dropping envelope with unrecognized type.");
            }
            Inbound::Malformed(e) => warn!(error = %e, "Dropping malformed envelope."),
        }
    }
}

async fn dispatch(envelope: ClientEnvelope, input: &InputHandle) -> Result<(), RelayError> {
    match envelope {
        ClientEnvelope::Text { data, .. } => {
            debug!(chars = data.chars().count(), "Client text -> agent.");
            input
                .send_content(Content::user_text(data))
                .await
                .map_err(RelayError::InputSink)
        }
        ClientEnvelope::Audio { mime_type, data } => {
            let bytes = match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Dropping audio envelope with invalid base64 payload.");
                    return Ok(());
                }
            };
            let blob = Blob::new(mime_type, bytes);
            if !blob.is_pcm_audio() {
                warn!(mime_type = %blob.mime_type, "Dropping audio envelope that is not PCM.");
                return Ok(());
            }
            trace!(len = blob.data.len(), mime_type = %blob.mime_type, "Client audio -> agent.");
            input
                .send_realtime(blob)
                .await
                .map_err(RelayError::InputSink)
        }
        ClientEnvelope::Settings { .. } => {
            debug!("Ignoring settings envelope after handshake.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::{channel::mpsc, stream};
    use std::sync::{Arc, Mutex};
    use vox_core::{event::Role, session::InputSink};

    #[derive(Default)]
    struct Recorder {
        contents: Mutex<Vec<Content>>,
        blobs: Mutex<Vec<Blob>>,
        reject: bool,
    }

    #[async_trait]
    impl InputSink for Recorder {
        async fn send_content(&self, content: Content) -> anyhow::Result<()> {
            if self.reject {
                return Err(anyhow!("session closed by provider"));
            }
            self.contents.lock().unwrap().push(content);
            Ok(())
        }
        async fn send_realtime(&self, blob: Blob) -> anyhow::Result<()> {
            self.blobs.lock().unwrap().push(blob);
            Ok(())
        }
        fn close(&self) {}
    }

    fn frames(texts: &[&str]) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        let messages: Vec<_> = texts
            .iter()
            .map(|t| Ok(Message::Text((*t).into())))
            .collect();
        stream::iter(messages)
    }

    async fn run(texts: &[&str]) -> (Result<(), RelayError>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let result = relay(frames(texts), InputHandle::new(recorder.clone())).await;
        (result, recorder)
    }

    #[tokio::test]
    async fn test_text_envelope_becomes_user_content() {
        let (result, recorder) =
            run(&[r#"{"type":"text","mime_type":"text/plain","data":"Hello"}"#]).await;

        assert!(result.unwrap_err().is_disconnect());
        let contents = recorder.contents.lock().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, Role::User);
        assert_eq!(contents[0].parts.len(), 1);
        assert_eq!(contents[0].parts[0].text.as_deref(), Some("Hello"));
        assert!(recorder.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_chunks_keep_byte_fidelity() {
        let chunks: Vec<Vec<u8>> = vec![
            vec![0x00, 0x01, 0x02],
            (0..=255).collect(),
            vec![0xff; 3200],
            vec![0x7f],
        ];
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| {
                format!(
                    r#"{{"type":"audio","mime_type":"audio/pcm","data":"{}"}}"#,
                    BASE64.encode(c)
                )
            })
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let (_, recorder) = run(&refs).await;

        let blobs = recorder.blobs.lock().unwrap();
        assert_eq!(blobs.len(), chunks.len());
        for (blob, chunk) in blobs.iter().zip(&chunks) {
            assert_eq!(blob.mime_type, "audio/pcm");
            assert_eq!(&blob.data, chunk);
        }
    }

    #[tokio::test]
    async fn test_bad_input_is_dropped_and_loop_continues() {
        let (result, recorder) = run(&[
            r#"{"type":"video","data":"..."}"#,
            r#"{"no_type":true}"#,
            "definitely not json",
            r#"{"type":"text","mime_type":"text/plain"}"#,
            r#"{"type":"audio","mime_type":"audio/pcm","data":"***"}"#,
            r#"{"type":"audio","mime_type":"video/mp4","data":"AQID"}"#,
            r#"{"type":"audio","mime_type":"","data":"AQID"}"#,
            r#"{"type":"settings","settings":{"app_name":"again"}}"#,
            r#"{"type":"text","data":"still here"}"#,
        ])
        .await;

        assert!(result.unwrap_err().is_disconnect());
        assert!(recorder.blobs.lock().unwrap().is_empty());
        let contents = recorder.contents.lock().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts[0].text.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn test_control_and_binary_frames_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let reader = stream::iter(vec![
            Ok::<_, axum::Error>(Message::Ping(Default::default())),
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Text(r#"{"type":"text","data":"ok"}"#.into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"text","data":"after close"}"#.into())),
        ]);

        let err = relay(reader, InputHandle::new(recorder.clone()))
            .await
            .unwrap_err();

        assert!(err.is_disconnect());
        assert_eq!(recorder.contents.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pcm_mime_with_rate_is_forwarded() {
        let (_, recorder) = run(&[
            r#"{"type":"audio","mime_type":"audio/pcm;rate=16000","data":"AQID"}"#,
            r#"{"type":"audio","mime_type":"audio/wav","data":"AQID"}"#,
        ])
        .await;

        let blobs = recorder.blobs.lock().unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].mime_type, "audio/pcm;rate=16000");
        assert_eq!(blobs[0].data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sink_rejection_stops_relay() {
        let recorder = Arc::new(Recorder {
            reject: true,
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();
        tx.unbounded_send(Ok(Message::Text(r#"{"type":"text","data":"Hi"}"#.into())))
            .unwrap();

        let err = relay(rx, InputHandle::new(recorder)).await.unwrap_err();

        assert!(matches!(err, RelayError::InputSink(_)));
        drop(tx);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_forwarding() {
        let recorder = Arc::new(Recorder::default());
        let input = InputHandle::new(recorder.clone());
        input.close();

        let err = relay(frames(&[r#"{"type":"text","data":"late"}"#]), input)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::InputSink(_)));
        assert!(recorder.contents.lock().unwrap().is_empty());
    }
}
