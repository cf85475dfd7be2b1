//! Common error types for crmsync.

use thiserror::Error;

/// Top-level error type for crmsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network failure, timeout, rate limit or 5xx from a collaborator.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials rejected (401/403). Fatal to a run.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A record cannot be processed as given.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination schema could not be reconciled.
    #[error("Schema sync error: {0}")]
    SchemaSync(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must stop the whole run rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Whether a transport collaborator may retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
