//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding sync messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be serialized or parsed as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A receive response is not framed the way the protocol requires.
    #[error("broken sync stream: {0}")]
    BrokenSyncStream(String),

    /// A required field is absent from a response.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl ProtocolError {
    /// Creates a broken stream error.
    pub fn broken(message: impl Into<String>) -> Self {
        Self::BrokenSyncStream(message.into())
    }
}
