//! Error types for keen-core

use thiserror::Error;

/// Main error type for the keen-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Event rejected before it reached the store
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Collection name rejected before it reached the store
    #[error("invalid collection name {name:?}: {reason}")]
    InvalidCollection { name: String, reason: String },

    /// Handle does not refer to a stored event
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Reachability check failed, flush was not attempted
    #[error("network not connected")]
    NetworkUnavailable,

    /// HTTP request could not be completed
    #[error("transport error: {0}")]
    Transport(String),

    /// Ingestion API answered with a non-success status
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Batch response could not be interpreted
    #[error("malformed response: {0}")]
    Response(String),
}

impl Error {
    pub(crate) fn invalid_collection(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidCollection {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for keen-core
pub type Result<T> = std::result::Result<T, Error>;
