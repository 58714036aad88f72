//! The long-lived symmetric secret.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A random alphanumeric passphrase used for all symmetric crypto.
///
/// The contents are zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    value: String,
}

impl Secret {
    /// Generates a secret of `length` alphanumeric characters.
    pub fn generate(length: usize) -> Self {
        let value = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        Self { value }
    }

    /// Wraps an existing passphrase.
    pub fn from_string(value: String) -> Self {
        Self { value }
    }

    /// Returns the passphrase.
    ///
    /// # Security
    ///
    /// Don't log or persist the result in the clear.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Returns the passphrase bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Returns the length in characters.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.value.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}
