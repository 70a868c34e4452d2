//! Vocalis server library logic.

pub mod api;
pub mod api_ws;
pub mod config;
pub mod session;
mod speech;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use session::{SessionRegistry, SessionSettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use vocalis_llm::CompletionEngine;
use vocalis_types::VoiceSettings;
use vocalis_voice::Synthesizer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Completion engine shared by every session.
    pub engine: Arc<CompletionEngine>,
    /// Speech synthesizer; `None` when synthesis is disabled.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub voice: VoiceSettings,
    pub session: SessionSettings,
    /// Control channels of the live websocket sessions.
    pub sessions: SessionRegistry,
    pub database_enabled: bool,
    /// Cancelled once on shutdown; every session closes when it fires.
    pub shutdown: CancellationToken,
    /// Directory served under `/static`, if any.
    pub static_dir: Option<String>,
}

/// Maximum request body size (64 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Creates the application router.
pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(api::index_handler))
        .route("/api/status", get(api::status_handler))
        .route("/api/reset", post(api::reset_handler))
        .route("/ws", get(api_ws::ws_handler));

    let router = match state.static_dir.as_deref() {
        Some(dir) if std::path::Path::new(dir).is_dir() => {
            tracing::info!(path = %dir, "serving static files at /static");
            router.nest_service("/static", ServeDir::new(dir))
        }
        Some(dir) => {
            tracing::warn!(path = %dir, "static directory not found, skipping");
            router
        }
        None => router,
    };

    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
