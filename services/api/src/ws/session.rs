//! Manages the WebSocket connection lifecycle for one agent session.
//!
//! A connection moves through `Negotiating -> Active -> Closing -> Closed`.
//! While active, the outbound and inbound relays run as two tasks; whichever
//! finishes first (cleanly or not) ends the session and the other one is
//! aborted. The agent's input sink is released once, by this module only.

use super::{
    RelayError, inbound,
    negotiate::{NegotiationError, negotiate},
    outbound::{self, send_envelope},
    protocol::ServerEnvelope,
};
use crate::state::AppState;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinError};
use tracing::{Instrument, Span, debug, error, info, instrument, warn};
use vox_core::session::{MediaMode, Session};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub is_audio: Option<String>,
}

impl WsParams {
    pub fn mode(&self) -> MediaMode {
        MediaMode::from_flag(self.is_audio.as_deref() == Some("true"))
    }
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mode = params.mode();
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, mode))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Negotiating,
    Active,
    Closing,
    Closed,
}

impl Phase {
    fn enter(self) {
        Span::current().record("phase", self.as_str());
        debug!(phase = self.as_str(), "Session phase changed.");
    }

    fn as_str(self) -> &'static str {
        match self {
            Phase::Negotiating => "negotiating",
            Phase::Active => "active",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        }
    }
}

/// Entry point for an individual WebSocket connection.
#[instrument(
    name = "ws_session",
    skip_all,
    fields(user_id = %user_id, mode = %mode, conn_id, phase)
)]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String, mode: MediaMode) {
    let conn_id: u32 = rand::random();
    Span::current().record("conn_id", conn_id);
    Phase::Negotiating.enter();
    info!("New WebSocket connection. Awaiting settings...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    let session = match negotiate(&mut socket_rx, state.sessions.as_ref(), &user_id, mode).await {
        Ok(session) => session,
        Err(NegotiationError::Disconnected) => {
            info!("Client disconnected before sending settings.");
            Phase::Closed.enter();
            return;
        }
        Err(e) => {
            warn!(error = %e, "Session negotiation failed.");
            let rejection = ServerEnvelope::error(e.to_string());
            if let Err(e) = send_envelope(&mut socket_tx, &rejection).await {
                debug!(error = %e, "Could not deliver rejection envelope.");
            }
            let _ = socket_tx.close().await;
            Phase::Closed.enter();
            return;
        }
    };

    let report = run_session(session, socket_tx, socket_rx).await;
    info!(outbound = %report.outbound, inbound = %report.inbound, "WebSocket session closed.");
}

/// How one relay task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran to its natural end.
    Completed,
    /// The client went away.
    Disconnected,
    /// Aborted because the other relay finished first.
    Cancelled,
    Failed(String),
    Panicked,
}

impl TaskOutcome {
    fn from_join(task: &'static str, result: Result<Result<(), RelayError>, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => {
                info!(task, "Relay finished.");
                TaskOutcome::Completed
            }
            Ok(Err(e)) if e.is_disconnect() => {
                info!(task, reason = %e, "Relay stopped: client disconnected.");
                TaskOutcome::Disconnected
            }
            Ok(Err(e)) => {
                error!(task, error = %e, "Relay failed.");
                TaskOutcome::Failed(e.to_string())
            }
            Err(e) if e.is_cancelled() => {
                debug!(task, "Relay cancelled.");
                TaskOutcome::Cancelled
            }
            Err(e) => {
                error!(task, error = %e, "Relay panicked.");
                TaskOutcome::Panicked
            }
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Disconnected => write!(f, "disconnected"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
            TaskOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            TaskOutcome::Panicked => write!(f, "panicked"),
        }
    }
}

/// The terminal outcome of both relays of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outbound: TaskOutcome,
    pub inbound: TaskOutcome,
}

/// Runs both relays for an established session until the first one ends,
/// then aborts the other and releases the agent's input sink.
///
/// Unless the outbound relay closed the client connection itself, a close
/// frame is sent here. The relay tasks inherit the current span.
pub async fn run_session<W, R, E>(session: Session, writer: W, reader: R) -> SessionReport
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let Session {
        events,
        input,
        mode,
        settings,
    } = session;
    Phase::Active.enter();
    info!(app_name = %settings.app_name, %mode, "Agent session active.");

    let writer = Arc::new(Mutex::new(writer));
    let span = Span::current();
    let mut outbound_task =
        tokio::spawn(outbound::relay(events, writer.clone()).instrument(span.clone()));
    let mut inbound_task = tokio::spawn(inbound::relay(reader, input.clone()).instrument(span));

    let (outbound_result, inbound_result) = tokio::select! {
        result = &mut outbound_task => {
            Phase::Closing.enter();
            inbound_task.abort();
            (result, inbound_task.await)
        }
        result = &mut inbound_task => {
            Phase::Closing.enter();
            outbound_task.abort();
            (outbound_task.await, result)
        }
    };

    let report = SessionReport {
        outbound: TaskOutcome::from_join("outbound", outbound_result),
        inbound: TaskOutcome::from_join("inbound", inbound_result),
    };

    if report.outbound != TaskOutcome::Completed {
        close_writer(&writer).await;
    }
    if input.close() {
        debug!("Agent input sink released.");
    }
    Phase::Closed.enter();
    report
}

async fn close_writer<W>(writer: &Mutex<W>)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let close = async { writer.lock().await.close().await };
    match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
        Ok(Ok(())) => debug!("Client connection closed."),
        Ok(Err(e)) => debug!(error = %e, "Client connection already gone."),
        Err(_) => warn!("Timed out closing client connection."),
    }
}
