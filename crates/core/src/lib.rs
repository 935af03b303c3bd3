//! Vox Core
//!
//! The provider-neutral contract between the conversation bridge and whatever
//! hosts the agent: the event model, the session factory and input sink
//! traits, and the per-connection settings document.

pub mod event;
pub mod session;
pub mod settings;
