//! Error types for invex.

use thiserror::Error;

/// Result type alias using invex's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for invex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed or missing input (blank image, confidence out of bounds, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Referenced product, config, or validation does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. two creates racing on the same image hash
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Signal extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Confidence scoring produced an unusable value
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// A backing store is unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means a backing service is down rather than that a
    /// single lookup came back empty or malformed.
    ///
    /// Hard infrastructure failures abort an identification; everything else
    /// degrades the affected matching tier to "found nothing".
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Error::Unavailable(_) | Error::Timeout(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Whether the caller may retry the whole operation from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Extraction(_) | Error::Timeout(_)) || self.is_infrastructure()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Unavailable(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
