//! Vox API Library Crate
//!
//! The web service that bridges browser websocket clients to live agent
//! sessions: configuration, shared state, routing and the session bridge
//! itself. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
