//! HTTP handlers for the Vocalis server.

use crate::AppState;
use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// The browser client served at `/`.
const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Response body for `GET /api/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub tts_ready: bool,
    pub tools_enabled: bool,
    pub database_enabled: bool,
    pub tools: Vec<String>,
    pub active_sessions: usize,
}

/// Optional request body for `POST /api/reset`.
#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    pub session_id: Option<Uuid>,
}

/// Response body for `POST /api/reset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub sessions: usize,
}

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StatusResponse> {
    let tts_ready = state
        .synthesizer
        .as_ref()
        .is_some_and(|s| s.is_ready(&state.voice));
    let tools = state
        .engine
        .registry()
        .map(|r| r.tool_names().into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    Json(StatusResponse {
        status: "online".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.engine.settings().model.clone(),
        voice: state.voice.voice.clone(),
        speed: state.voice.speed,
        tts_ready,
        tools_enabled: state.engine.tools_enabled(),
        database_enabled: state.database_enabled,
        tools,
        active_sessions: state.sessions.len().await,
    })
}

/// Resets one session, or all of them when the body is empty.
///
/// The body is read as raw bytes so an empty request needs no content type.
pub async fn reset_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ResetResponse>, ApiError> {
    let request: ResetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let sessions = state
        .sessions
        .reset(request.session_id)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;
    tracing::info!(sessions, target = ?request.session_id, "history reset over HTTP");

    Ok(Json(ResetResponse {
        status: "reset".to_string(),
        sessions,
    }))
}
