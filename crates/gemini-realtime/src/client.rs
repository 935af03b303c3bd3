//! Gemini Live session factory.
//!
//! Each call to `create_session` opens a dedicated websocket to Gemini Live,
//! completes the setup handshake, and hands back the connection as an event
//! stream plus an input sink. Writes go through a single writer task so the
//! sink can be shared and closed without holding the socket.

use crate::{
    translate::{Translation, content_message, realtime_message, translate},
    types::{
        ClientMessage, Empty, FunctionDeclaration, GenerationConfig, PrebuiltVoiceConfig,
        ResponseModality, ServerMessage, Setup, SpeechConfig, Tool, VoiceConfig, WireContent,
        WirePart,
    },
};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{self, SplitSink, SplitStream},
};
use serde_json::json;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{Instrument, debug, error, info, warn};
use vox_core::{
    event::{AgentEvent, Blob, Content},
    session::{AgentSession, EventStream, InputSink, MediaMode, SessionFactory},
    settings::{CONTEXT_TOOL_NAME, SettingsDocument},
};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-live-preview";

const OUTGOING_CAPACITY: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Connection settings for Gemini Live.
#[derive(Clone, Debug)]
pub struct GeminiLiveConfig {
    /// Server-wide key; a key in the settings document takes precedence.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub setup_timeout: Duration,
}

impl Default for GeminiLiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            setup_timeout: Duration::from_secs(15),
        }
    }
}

/// A [`SessionFactory`] backed by the Gemini Live API.
pub struct GeminiLive {
    config: GeminiLiveConfig,
}

impl GeminiLive {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }

    fn api_key<'a>(&'a self, settings: &'a SettingsDocument) -> Result<&'a str> {
        settings
            .gemini_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .or(self.config.api_key.as_deref())
            .context("No Gemini API key configured for this session")
    }
}

#[async_trait]
impl SessionFactory for GeminiLive {
    async fn create_session(
        &self,
        user_id: &str,
        settings: &SettingsDocument,
        mode: MediaMode,
    ) -> Result<AgentSession> {
        let url = format!("{}?key={}", self.config.endpoint, self.api_key(settings)?);
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(%user_id, %mode, app_name = %settings.app_name, "Connected to Gemini Live WebSocket.");
        let (mut gemini_tx, mut gemini_rx) = ws_stream.split();

        let setup = ClientMessage::Setup(build_setup(&self.config.model, settings, mode));
        send(&mut gemini_tx, &setup).await?;
        tokio::time::timeout(self.config.setup_timeout, await_setup_complete(&mut gemini_rx))
            .await
            .map_err(|_| anyhow!("Timed out waiting for Gemini Live setup to complete"))??;
        info!("Gemini session setup is complete. Ready for bidirectional streaming.");

        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(write_loop(gemini_tx, outgoing_rx, shutdown_rx).in_current_span());

        let input = GeminiInput {
            outgoing: outgoing_tx.clone(),
            shutdown: Mutex::new(Some(shutdown_tx)),
        };
        Ok(AgentSession {
            events: event_stream(gemini_rx, outgoing_tx),
            input: Arc::new(input),
        })
    }
}

/// Builds the setup message for a conversation.
pub fn build_setup(model: &str, settings: &SettingsDocument, mode: MediaMode) -> Setup {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };

    let (modality, speech_config, transcription) = match mode {
        MediaMode::Text => (ResponseModality::Text, None, None),
        MediaMode::Audio => {
            let speech = (settings.voice_name.is_some() || settings.language_code.is_some())
                .then(|| SpeechConfig {
                    voice_config: settings.voice_name.clone().map(|voice_name| VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                    }),
                    language_code: settings.language_code.clone(),
                });
            (ResponseModality::Audio, speech, Some(Empty {}))
        }
    };

    let mut tools = vec![Tool::FunctionDeclarations(vec![context_tool()])];
    if settings.search_enabled() {
        tools.push(Tool::GoogleSearch(Empty {}));
    }

    Setup {
        model,
        generation_config: GenerationConfig {
            response_modalities: vec![modality],
            speech_config,
        },
        system_instruction: Some(WireContent {
            role: None,
            parts: vec![WirePart {
                text: Some(settings.instruction()),
                inline_data: None,
            }],
        }),
        tools,
        input_audio_transcription: transcription.clone(),
        output_audio_transcription: transcription,
    }
}

fn context_tool() -> FunctionDeclaration {
    FunctionDeclaration {
        name: CONTEXT_TOOL_NAME.to_string(),
        description: "Store or update one entry of the conversation context shared with the user."
            .to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "key": { "type": "STRING", "description": "Name of the context entry." },
                "value": { "type": "STRING", "description": "New value for the entry." }
            },
            "required": ["key", "value"]
        }),
    }
}

async fn send(sink: &mut WsSink, msg: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(msg)?;
    sink.send(WsMessage::Text(payload.into())).await?;
    Ok(())
}

/// Gemini sends JSON in both text and binary frames.
fn decode_frame(frame: &WsMessage) -> Option<serde_json::Result<ServerMessage>> {
    match frame {
        WsMessage::Text(text) => Some(serde_json::from_str(text.as_str())),
        WsMessage::Binary(bytes) => Some(serde_json::from_slice(bytes)),
        _ => None,
    }
}

async fn await_setup_complete(source: &mut WsSource) -> Result<()> {
    while let Some(frame) = source.next().await {
        let frame = frame.context("Gemini Live connection failed during setup")?;
        if let WsMessage::Close(close_frame) = &frame {
            bail!("Gemini Live closed the connection during setup: {close_frame:?}");
        }
        match decode_frame(&frame) {
            Some(Ok(msg)) if msg.setup_complete.is_some() => return Ok(()),
            Some(Ok(msg)) => warn!(?msg, "Received unexpected message during Gemini setup."),
            Some(Err(e)) => warn!(error = %e, "Failed to parse Gemini message during setup."),
            None => {}
        }
    }
    bail!("Gemini Live connection ended before setup completed")
}

async fn write_loop(
    mut sink: WsSink,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Input sink released. Closing Gemini Live connection.");
                outgoing.close();
                while let Some(msg) = outgoing.recv().await {
                    if let Err(e) = send(&mut sink, &msg).await {
                        error!(error = ?e, "Failed to flush queued input to Gemini Live.");
                        break;
                    }
                }
                break;
            }
            msg = outgoing.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = send(&mut sink, &msg).await {
                        error!(error = ?e, "Failed to write to Gemini Live.");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.close().await;
}

/// The write side of a Gemini Live session.
struct GeminiInput {
    outgoing: mpsc::Sender<ClientMessage>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl GeminiInput {
    async fn enqueue(&self, msg: ClientMessage) -> Result<()> {
        self.outgoing
            .send(msg)
            .await
            .map_err(|_| anyhow!("Gemini Live connection is closed"))
    }
}

#[async_trait]
impl InputSink for GeminiInput {
    async fn send_content(&self, content: Content) -> Result<()> {
        self.enqueue(content_message(&content)).await
    }

    async fn send_realtime(&self, blob: Blob) -> Result<()> {
        self.enqueue(realtime_message(&blob)).await
    }

    fn close(&self) {
        let shutdown = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
    }
}

/// Reads server frames and buffers the events each one translates into.
struct EventReader {
    source: WsSource,
    pending: VecDeque<AgentEvent>,
    replies: mpsc::Sender<ClientMessage>,
}

impl EventReader {
    async fn next_event(&mut self) -> Option<Result<AgentEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            let frame = match self.source.next().await? {
                Ok(frame) => frame,
                Err(e) => {
                    return Some(Err(
                        anyhow::Error::new(e).context("Error reading from Gemini Live WebSocket")
                    ));
                }
            };
            if let WsMessage::Close(close_frame) = &frame {
                info!(?close_frame, "Gemini Live connection closed by server.");
                return None;
            }
            let message = match decode_frame(&frame) {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(error = %e, "Skipping malformed Gemini Live message.");
                    continue;
                }
                None => continue,
            };

            let Translation { events, replies } = translate(message);
            for reply in replies {
                if self.replies.send(reply).await.is_err() {
                    warn!("Dropping tool response: the Gemini Live writer has stopped.");
                }
            }
            self.pending.extend(events);
        }
    }
}

fn event_stream(source: WsSource, replies: mpsc::Sender<ClientMessage>) -> EventStream {
    let reader = EventReader {
        source,
        pending: VecDeque::new(),
        replies,
    };
    stream::unfold(reader, |mut reader| async move {
        let item = reader.next_event().await?;
        Some((item, reader))
    })
    .boxed()
}
