//! Backend error types.

use insight_core::InsightError;
use thiserror::Error;

/// Result type alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised while talking to a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("backend returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<BackendError> for InsightError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => InsightError::BackendUnavailable(msg),
            BackendError::NotFound(msg) => InsightError::NotFound(msg),
            other => InsightError::Internal(other.to_string()),
        }
    }
}
