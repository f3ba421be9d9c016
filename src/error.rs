use thiserror::Error;

/// Failure kinds surfaced by admission, scoring, ingestion and storage.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced match, prediction or user does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The target's lifecycle state forbids the operation
    /// (predicting after kickoff, scoring without a result, ...).
    #[error("{0}")]
    InvalidState(String),

    /// Uniqueness violation not resolved by upsert semantics.
    #[error("{0}")]
    Conflict(String),

    /// Fixture source unreachable or returned unmappable data.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// No resolved identity was attached to the request.
    #[error("{0}")]
    Unauthorized(String),

    /// Identity resolved but lacks the required role.
    #[error("{0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage unavailable: connection mutex poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Conflict(_) => "CONFLICT",
            Error::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::Storage(_) | Error::Poisoned => "INTERNAL",
        }
    }

    /// Message safe to hand back to a client. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Storage(_) | Error::Poisoned => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn match_not_found(match_id: &str) -> Self {
        Error::NotFound(format!("match '{}' not found", match_id))
    }
}
