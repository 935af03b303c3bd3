//! Axum Router Configuration
//!
//! The bridge lives at `/ws/{user_id}`. When a static directory is
//! configured, everything else falls through to the built frontend.

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let static_dir = app_state.config.static_dir.clone();

    let router = Router::new()
        .route("/ws/{user_id}", get(ws_handler))
        .with_state(app_state);

    match static_dir {
        Some(dir) => {
            let index = dir.join("index.html");
            router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => router,
    }
}
