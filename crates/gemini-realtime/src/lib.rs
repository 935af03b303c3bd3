//! Gemini Live backend for agent sessions.
//!
//! Implements [`vox_core::session::SessionFactory`] on top of the Gemini Live
//! bidirectional websocket API.

mod client;
pub mod translate;
pub mod types;

pub use client::{DEFAULT_ENDPOINT, DEFAULT_MODEL, GeminiLive, GeminiLiveConfig, build_setup};
