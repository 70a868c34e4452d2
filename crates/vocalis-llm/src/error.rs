use std::time::Duration;

/// Failures talking to the model service. All of them end the current turn.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model service error: {0}")]
    Service(String),

    #[error("malformed model output: {0}")]
    Decode(String),

    #[error("model stream ended before completion")]
    Truncated,

    #[error("model stream idle for {0:?}")]
    Idle(Duration),
}
