//! Agent Session Contract
//!
//! The bridge sees an agent session through exactly two capabilities: a lazy
//! stream of [`AgentEvent`]s and an [`InputSink`]. Whatever runs behind them
//! (a websocket to a hosted model, an in-process fake) is an implementation
//! detail of the [`SessionFactory`] that produced them.

use crate::{
    event::{AgentEvent, Blob, Content},
    settings::SettingsDocument,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;

/// The read side of an agent session. Finite only when the session ends.
pub type EventStream = BoxStream<'static, Result<AgentEvent>>;

/// Whether a conversation streams audio or exchanges text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaMode {
    #[default]
    Text,
    Audio,
}

impl MediaMode {
    pub fn from_flag(is_audio: bool) -> Self {
        if is_audio { Self::Audio } else { Self::Text }
    }

    pub fn is_audio(self) -> bool {
        self == Self::Audio
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaMode::Text => write!(f, "text"),
            MediaMode::Audio => write!(f, "audio"),
        }
    }
}

/// The write side of an agent session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputSink: Send + Sync {
    /// Submits a structured content message (e.g. a typed user turn).
    async fn send_content(&self, content: Content) -> Result<()>;

    /// Submits a raw realtime blob (e.g. a chunk of microphone audio).
    async fn send_realtime(&self, blob: Blob) -> Result<()>;

    /// Releases the sink. Called at most once by [`InputHandle`].
    fn close(&self);
}

/// The two halves of a freshly created agent session.
pub struct AgentSession {
    pub events: EventStream,
    pub input: Arc<dyn InputSink>,
}

/// Creates agent sessions bound to a settings document and a media mode.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        settings: &SettingsDocument,
        mode: MediaMode,
    ) -> Result<AgentSession>;
}

struct SinkState {
    sink: Arc<dyn InputSink>,
    closed: AtomicBool,
}

impl SinkState {
    fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink.close();
        true
    }
}

impl Drop for SinkState {
    fn drop(&mut self) {
        if self.release() {
            debug!("Input sink released on drop.");
        }
    }
}

/// A shareable handle to an [`InputSink`] whose release happens exactly once.
///
/// `close` is idempotent. If no holder ever calls it, the sink is released
/// when the last clone of the handle is dropped.
#[derive(Clone)]
pub struct InputHandle {
    state: Arc<SinkState>,
}

impl InputHandle {
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self {
            state: Arc::new(SinkState {
                sink,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn send_content(&self, content: Content) -> Result<()> {
        self.ensure_open()?;
        self.state.sink.send_content(content).await
    }

    pub async fn send_realtime(&self, blob: Blob) -> Result<()> {
        self.ensure_open()?;
        self.state.sink.send_realtime(blob).await
    }

    /// Releases the underlying sink. Returns `true` only for the call that
    /// actually released it.
    pub fn close(&self) -> bool {
        self.state.release()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            bail!("input sink is closed");
        }
        Ok(())
    }
}

impl fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Everything one connection owns about its agent session.
pub struct Session {
    pub events: EventStream,
    pub input: InputHandle,
    pub mode: MediaMode,
    /// The settings snapshot the session was created from.
    pub settings: Arc<SettingsDocument>,
}

impl Session {
    pub fn new(agent: AgentSession, mode: MediaMode, settings: SettingsDocument) -> Self {
        Self {
            events: agent.events,
            input: InputHandle::new(agent.input),
            mode,
            settings: Arc::new(settings),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("app_name", &self.settings.app_name)
            .field("mode", &self.mode)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}
