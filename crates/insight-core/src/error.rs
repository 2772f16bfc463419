//! Error taxonomy shared by the status and log paths.

use thiserror::Error;

/// Result type alias for request-scoped operations.
pub type InsightResult<T> = Result<T, InsightError>;

/// Errors surfaced to the caller of a status or log request.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("missing scope {scope} for {handle}")]
    Forbidden { handle: String, scope: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl InsightError {
    pub fn forbidden(handle: &str, scope: &str) -> Self {
        Self::Forbidden {
            handle: handle.to_string(),
            scope: scope.to_string(),
        }
    }

    /// Message that is safe to return to the caller.
    ///
    /// Backend failures collapse to a summary; the full cause is only
    /// logged.
    pub fn public_message(&self) -> String {
        match self {
            Self::Forbidden { handle, scope } => {
                format!("user does not have access to this deployment, missing scope {scope} for {handle}")
            }
            Self::NotFound(what) => format!("not found: {what}"),
            Self::BackendUnavailable(_) => "a backend service is unavailable".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }
}
