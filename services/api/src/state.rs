//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources handed to every connection.

use crate::config::Config;
use std::sync::Arc;
use vox_core::session::SessionFactory;

/// The shared application state, created once at startup and passed to all handlers.
///
/// Nothing in here is per-conversation: each connection brings its own
/// settings document and gets its own agent session from `sessions`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionFactory>,
}
