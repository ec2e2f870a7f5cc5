//! Error types for threshold session operations

use thiserror::Error;

/// Result type alias for threshold session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a threshold session
#[derive(Debug, Error)]
pub enum Error {
    // ============ Session Lifecycle Errors ============
    /// The relay refused or failed the session registration
    #[error("Registration failed for session {session_id}: {reason}")]
    RegistrationFailed { session_id: String, reason: String },

    /// Not enough parties joined before the rendezvous deadline
    #[error("Rendezvous timeout for session {session_id}: expected {expected} parties, {joined} joined")]
    RendezvousTimeout {
        session_id: String,
        expected: usize,
        joined: usize,
    },

    /// The protocol did not finish before its deadline
    #[error("Protocol timeout for session {session_id} during {stage}")]
    ProtocolTimeout { session_id: String, stage: String },

    // ============ Key Share Errors ============
    /// No key share held for the requested public key
    #[error("Key share not found: {0}")]
    KeyShareNotFound(String),

    // ============ Engine Errors ============
    /// The engine could not build a setup message or session
    #[error("Setup construction failed during {stage}: {reason}")]
    SetupConstructionFailed { stage: String, reason: String },

    /// The engine rejected an inbound protocol message
    #[error("Engine rejected message: {0}")]
    EngineApplyRejected(String),

    /// The engine signalled completion but could not produce an artifact
    #[error("Engine finish failed for session {session_id}: {reason}")]
    EngineFinishFailed { session_id: String, reason: String },

    /// Any other engine failure
    #[error("Engine error: {0}")]
    Engine(String),

    // ============ Transport Errors ============
    /// A message could not be encrypted, decrypted or unframed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Relay call failed
    #[error("Relay error: {0}")]
    Relay(String),

    /// Co-signer join request failed
    #[error("Co-signer error: {0}")]
    CoSigner(String),

    // ============ Input Errors ============
    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ============ Storage Errors ============
    /// Vault storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// At-rest encryption/decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    // ============ Serialization Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the driver swallows this error at single-message granularity
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::EngineApplyRejected(_))
    }

    pub(crate) fn setup(stage: impl Into<String>, reason: impl ToString) -> Self {
        Error::SetupConstructionFailed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
