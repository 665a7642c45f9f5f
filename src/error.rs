//! Error types for the signal pipeline.
//!
//! Errors are classified by how far they are allowed to travel:
//! - Transport: retryable by the caller re-issuing the request, never inside
//!   the client
//! - Parse: the analysis produced no usable payload, i.e. "no signal"
//! - Configuration: missing credentials; short-circuits the affected phase
//! - Persistence: store read/write failure, surfaced to the immediate caller

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum SignalError {
    /// Non-2xx response, network failure or timeout from an external API.
    /// `status` is `None` when no HTTP response was received.
    #[error("{}", transport_message(.status, .body))]
    Transport { status: Option<u16>, body: String },

    #[error("Failed to parse analysis output: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn transport_message(status: &Option<u16>, body: &str) -> String {
    match status {
        Some(code) => format!("HTTP {}: {}", code, body),
        None => format!("Request failed: {}", body),
    }
}

impl SignalError {
    pub fn transport(status: Option<u16>, body: impl Into<String>) -> Self {
        SignalError::Transport {
            status,
            body: body.into(),
        }
    }

    /// True for failures a caller may re-issue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignalError::Transport { .. })
    }

    /// True when the caller should treat this as "nothing produced" rather
    /// than as a failure.
    pub fn is_no_signal(&self) -> bool {
        matches!(self, SignalError::Parse(_))
    }

    /// HTTP status carried by a transport error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SignalError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SignalError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let body = if err.is_timeout() {
            format!("timed out: {}", err)
        } else {
            err.to_string()
        };
        SignalError::Transport { status, body }
    }
}
