//! Error types for session rotator operations

use crate::core::soniox::StreamError;

/// Error types for session rotator operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(#[from] StreamError),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for session rotator operations
pub type SessionResult<T> = Result<T, SessionError>;
