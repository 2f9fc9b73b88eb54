//! Backend error classification.

use thiserror::Error;

/// Failures talking to an LLM backend, classified for dispatch policy:
/// `RateLimited` and `Unavailable` put the owning session on standby and
/// requeue the exchange; `Malformed` is a protocol fault.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend rate limited")]
    RateLimited,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Classify an HTTP status with its response body.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return BackendError::RateLimited;
        }
        if status.is_server_error() {
            return BackendError::Unavailable(format!("{status}: {body}"));
        }
        BackendError::Malformed(format!("{status}: {body}"))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
