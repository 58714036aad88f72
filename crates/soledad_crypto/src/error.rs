//! Error types for key management and crypto operations.

use std::io;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while managing keys or encrypting data.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The persisted secret is missing, unreadable or does not decrypt.
    #[error("failed to load secret: {0}")]
    SecretLoad(String),

    /// A keypair or secret could not be generated or persisted.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// No identity has been generated or loaded yet.
    #[error("no identity available for this replica")]
    IdentityMissing,

    /// The identity on disk belongs to another owner.
    #[error("identity on disk belongs to {found}, expected {expected}")]
    IdentityMismatch {
        /// Owner the caller asked for.
        expected: String,
        /// Owner recorded in the keypair store.
        found: String,
    },

    /// Symmetric crypto was requested before the secret was loaded.
    #[error("secret has not been loaded")]
    SecretNotLoaded,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, corrupted data, etc.).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A document blob does not have the expected structure.
    #[error("invalid blob: {0}")]
    InvalidBlob(String),

    /// Armored text could not be parsed.
    #[error("invalid armor: {0}")]
    InvalidArmor(String),

    /// Signature creation or verification failed.
    #[error("signature error: {0}")]
    Signature(String),

    /// The key material has the wrong size.
    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The keypair store could not be (de)serialized.
    #[error("keypair store error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CryptoError {
    /// Returns true if this error leaves the replica without crypto
    /// capability until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptoError::SecretLoad(_)
                | CryptoError::KeyGeneration(_)
                | CryptoError::IdentityMissing
                | CryptoError::IdentityMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(CryptoError::SecretLoad("missing".into()).is_fatal());
        assert!(CryptoError::KeyGeneration("disk full".into()).is_fatal());
        assert!(!CryptoError::Decryption("bad tag".into()).is_fatal());
        assert!(!CryptoError::SecretNotLoaded.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::InvalidKeySize {
            expected: 32,
            actual: 16,
        };
        assert!(err.to_string().contains("32"));
        assert!(err.to_string().contains("16"));
    }
}
