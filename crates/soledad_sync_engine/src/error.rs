//! Error types for the sync engine.

use soledad_crypto::CryptoError;
use soledad_staging::StagingError;
use soledad_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server rejected the auth token.
    #[error("invalid auth token")]
    InvalidAuthToken,

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Network or TLS error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// A receive response is malformed.
    #[error("broken sync stream: {0}")]
    BrokenSyncStream(String),

    /// Document or key crypto failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The staging store failed.
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    /// The local replica refused a received document.
    #[error("insert failed for {doc_id}: {message}")]
    InsertCallback {
        /// Document that could not be inserted.
        doc_id: String,
        /// Reason given by the replica.
        message: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A crypto pool worker stopped unexpectedly.
    #[error("pool failed: {0}")]
    PoolFailed(String),
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::BrokenSyncStream(message) => Self::BrokenSyncStream(message),
            other => Self::Protocol(other),
        }
    }
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an insert error for `doc_id`.
    pub fn insert(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InsertCallback {
            doc_id: doc_id.into(),
            message: message.into(),
        }
    }

    /// Returns true if repeating the operation may succeed.
    ///
    /// The engine itself never retries; callers use this to decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::InvalidAuthToken.is_retryable());
    }

    #[test]
    fn broken_stream_is_lifted() {
        let err: SyncError = ProtocolError::broken("no metadata").into();
        assert!(matches!(err, SyncError::BrokenSyncStream(_)));

        let err: SyncError = ProtocolError::MissingField("new_generation").into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn error_display() {
        let err = SyncError::Http {
            status: 401,
            body: "nope".into(),
        };
        assert_eq!(err.to_string(), "HTTP 401: nope");
        assert_eq!(SyncError::InvalidAuthToken.to_string(), "invalid auth token");
    }
}
