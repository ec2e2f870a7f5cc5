//! Error types for the HTTP adapters

use thiserror::Error;

/// HTTP adapter errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// The service answered with a non-success status
    #[error("returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Unauthorized
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request never got an answer
    #[error("Network error: {0}")]
    Network(String),

    /// Body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation the service does not offer
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Status { status, .. } => *status,
            RelayError::Unauthorized(_) => 401,
            RelayError::Serialization(_) => 400,
            RelayError::Unsupported(_) => 405,
            RelayError::Network(_) => 503,
            RelayError::Internal(_) => 500,
        }
    }

    /// Whether repeating the request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Network(_) => true,
            RelayError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RelayError::Serialization(err.to_string())
        } else {
            RelayError::Network(err.to_string())
        }
    }
}

impl From<RelayError> for vault_tss_core::Error {
    fn from(err: RelayError) -> Self {
        vault_tss_core::Error::Relay(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
