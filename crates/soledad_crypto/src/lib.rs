//! # Soledad Crypto
//!
//! Key material and encryption for an end-to-end encrypted replica.
//!
//! This crate provides:
//! - Keypair lifecycle (X25519 for encryption, Ed25519 for signing)
//! - A long-lived random secret, encrypted at rest to the replica's own key
//! - Asymmetric and passphrase encryption with ASCII armor
//! - Per-document blob encryption keyed by the secret
//!
//! ## Key Invariants
//!
//! - First-run generation writes exactly one keypair file and one secret file
//! - Both files are created with owner-only permissions
//! - Key material is read-only once loaded
//! - Nothing retries internally
//!
//! ## Example
//!
//! ```rust,no_run
//! use soledad_crypto::{KeyManager, SecretsConfig};
//!
//! let keys = KeyManager::open(SecretsConfig::new("/var/lib/soledad", "user@example.org"))?;
//! keys.ensure_identity("user@example.org")?;
//! keys.ensure_secret()?;
//! keys.load_secret()?;
//!
//! let docs = keys.document_crypto()?;
//! let blob = docs.encrypt_doc("doc-1", "replica:1", b"{}")?;
//! assert_eq!(docs.decrypt_doc("doc-1", "replica:1", blob.as_bytes())?, b"{}");
//! # Ok::<(), soledad_crypto::CryptoError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod armor;
mod cipher;
mod config;
mod document;
mod envelope;
mod error;
mod identity;
mod manager;
mod secret;

pub use armor::{armor, dearmor};
pub use cipher::{AeadCipher, SymmetricKey, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
pub use config::{SecretsConfig, DEFAULT_SECRET_LENGTH};
pub use document::{is_symmetrically_encrypted, size_ceiling, DocumentCrypto, ENCRYPTED_PREFIX};
pub use envelope::{envelope_kind, EnvelopeKind};
pub use error::{CryptoError, CryptoResult};
pub use identity::{Fingerprint, Identity, PublicIdentity, FINGERPRINT_SIZE};
pub use manager::KeyManager;
pub use secret::Secret;
