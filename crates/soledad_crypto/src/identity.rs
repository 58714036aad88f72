//! Asymmetric identity: keypair generation, fingerprint, storage, loading.

use crate::error::{CryptoError, CryptoResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Size of a key fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 20;

const STORE_VERSION: u8 = 1;

/// Short, stable name for an identity's public keys.
///
/// Computed as the first 20 bytes of SHA-256 over the encryption and
/// verifying public keys, and displayed as 40 uppercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    fn of(encryption: &PublicKey, verifying: &VerifyingKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(encryption.as_bytes());
        hasher.update(verifying.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        bytes.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        Self(bytes)
    }

    /// Creates a fingerprint from raw bytes.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    /// Returns true if `name` is this fingerprint in hex, any case.
    pub fn matches(&self, name: &str) -> bool {
        self.to_string().eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// The public half of an identity.
#[derive(Clone, Debug)]
pub struct PublicIdentity {
    /// X25519 key that messages are encrypted to.
    pub encryption: PublicKey,
    /// Ed25519 key that signatures are checked against.
    pub verifying: VerifyingKey,
    /// Fingerprint of both keys.
    pub fingerprint: Fingerprint,
}

/// An asymmetric identity bound to an owner id.
///
/// Holds an X25519 key for encryption and an Ed25519 key for signing.
/// Private key material is zeroized on drop.
pub struct Identity {
    owner_id: String,
    encryption: StaticSecret,
    signing: SigningKey,
    public: PublicIdentity,
    created_at: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    version: u8,
    owner_id: String,
    fingerprint: String,
    encryption_key: String,
    signing_key: String,
    created_at: u64,
}

impl Identity {
    /// Generates a fresh identity for `owner_id`.
    pub fn generate(owner_id: &str) -> Self {
        let encryption = StaticSecret::random_from_rng(OsRng);
        let signing = SigningKey::generate(&mut OsRng);
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::from_parts(owner_id.to_string(), encryption, signing, created_at)
    }

    fn from_parts(
        owner_id: String,
        encryption: StaticSecret,
        signing: SigningKey,
        created_at: u64,
    ) -> Self {
        let encryption_public = PublicKey::from(&encryption);
        let verifying = signing.verifying_key();
        let public = PublicIdentity {
            fingerprint: Fingerprint::of(&encryption_public, &verifying),
            encryption: encryption_public,
            verifying,
        };
        Self {
            owner_id,
            encryption,
            signing,
            public,
            created_at,
        }
    }

    /// Returns the owner this identity is bound to.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns the fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint
    }

    /// Returns the public keys.
    pub fn public(&self) -> &PublicIdentity {
        &self.public
    }

    /// Returns the creation time in seconds since the Unix epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns true if `name` is this identity's owner id or fingerprint.
    pub fn is_named(&self, name: &str) -> bool {
        self.owner_id == name || self.public.fingerprint.matches(name)
    }

    pub(crate) fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Writes the identity to `path` with owner-only permissions.
    ///
    /// Returns `false` without touching the file if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, path: &Path) -> CryptoResult<bool> {
        let encryption_key = Zeroizing::new(STANDARD.encode(self.encryption.to_bytes()));
        let signing_key = Zeroizing::new(STANDARD.encode(self.signing.to_bytes()));
        let stored = StoredIdentity {
            version: STORE_VERSION,
            owner_id: self.owner_id.clone(),
            fingerprint: self.public.fingerprint.to_string(),
            encryption_key: encryption_key.to_string(),
            signing_key: signing_key.to_string(),
            created_at: self.created_at,
        };
        let json = Zeroizing::new(serde_json::to_vec_pretty(&stored)?);
        Ok(write_private_file(path, &json)?)
    }

    /// Loads an identity from `path`, or `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, malformed, or its
    /// recorded fingerprint does not match the keys it contains.
    pub fn load(path: &Path) -> CryptoResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredIdentity = serde_json::from_slice(&bytes)?;
        if stored.version != STORE_VERSION {
            return Err(CryptoError::KeyGeneration(format!(
                "unsupported keypair store version {}",
                stored.version
            )));
        }

        let encryption = StaticSecret::from(decode_key(&stored.encryption_key, "encryption")?);
        let signing = SigningKey::from_bytes(&decode_key(&stored.signing_key, "signing")?);
        let identity = Self::from_parts(stored.owner_id, encryption, signing, stored.created_at);

        if !identity.public.fingerprint.matches(&stored.fingerprint) {
            return Err(CryptoError::KeyGeneration(format!(
                "keypair store fingerprint {} does not match its keys",
                stored.fingerprint
            )));
        }
        Ok(Some(identity))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("owner_id", &self.owner_id)
            .field("fingerprint", &self.public.fingerprint)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

fn decode_key(encoded: &str, name: &str) -> CryptoResult<[u8; 32]> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::KeyGeneration(format!("bad {name} key: {e}")))?,
    );
    let mut key = [0u8; 32];
    if bytes.len() != key.len() {
        return Err(CryptoError::InvalidKeySize {
            expected: key.len(),
            actual: bytes.len(),
        });
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Prefix of the temporary files [`write_private_file`] writes through.
pub(crate) const TEMP_PREFIX: &str = ".soledad-";

/// Creates `path` with mode `0600` holding `contents`.
///
/// The contents go to a temporary file in the same directory first, which
/// is synced and then linked into place only if `path` does not exist yet.
/// `path` therefore never holds a partial file, and of two concurrent first
/// writers exactly one wins. Returns `false` if `path` already existed.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(parent)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    match file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
