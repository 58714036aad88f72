//! Error types for staging operations.

use std::io;
use thiserror::Error;

/// Result type for staging operations.
pub type StagingResult<T> = Result<T, StagingError>;

/// Errors that can occur while reading or writing staged entries.
#[derive(Debug, Error)]
pub enum StagingError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A staged entry on disk could not be decoded.
    #[error("staged entry corrupted: {0}")]
    Corrupted(String),
}
