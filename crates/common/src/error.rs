//! Error types for Specdeck

use thiserror::Error;

/// Result type alias using Specdeck Error
pub type Result<T> = std::result::Result<T, Error>;

/// Specdeck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed request data. Never mutates run state.
    #[error("{0}")]
    InvalidInput(String),

    /// The operation is not allowed in the current run phase.
    #[error("{0}")]
    Conflict(String),

    /// Unknown route or resource; the message is shown as is.
    #[error("{0}")]
    NotFound(String),

    #[error("Failed to start: {0}")]
    Spawn(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable name, used in HTTP error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Spawn(_) => "spawn",
            Error::Internal(_) => "internal",
        }
    }
}
