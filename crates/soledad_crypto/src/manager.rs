//! Secret and keypair lifecycle.

use crate::armor::{armor, dearmor};
use crate::config::SecretsConfig;
use crate::document::DocumentCrypto;
use crate::envelope::{self, frame, unframe};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::{write_private_file, Fingerprint, Identity};
use crate::secret::Secret;
use std::fs;
use std::io;
use std::sync::{Arc, OnceLock};
use zeroize::Zeroizing;

/// Owns the replica's keypair and secret.
///
/// Both are generated on first use, persisted under
/// [`SecretsConfig::config_dir`], and read-only once loaded. Loading is
/// a write-once step guarded by [`OnceLock`], so concurrent readers need
/// no further locking.
///
/// Nothing here retries: a failure is returned to the caller, which
/// decides whether to try again.
#[derive(Debug)]
pub struct KeyManager {
    config: SecretsConfig,
    identity: OnceLock<Arc<Identity>>,
    secret: OnceLock<Secret>,
}

impl KeyManager {
    /// Creates a manager for `config`.
    ///
    /// An existing keypair store is loaded eagerly; nothing is generated.
    ///
    /// # Errors
    ///
    /// Returns an error if a keypair store exists but cannot be read, and
    /// [`CryptoError::IdentityMismatch`] if it belongs to an owner other
    /// than [`SecretsConfig::owner_id`].
    pub fn open(config: SecretsConfig) -> CryptoResult<Self> {
        let manager = Self {
            config,
            identity: OnceLock::new(),
            secret: OnceLock::new(),
        };
        if let Some(identity) = Identity::load(&manager.config.identity_path())? {
            Self::check_owner(&identity, &manager.config.owner_id)?;
            tracing::debug!(fingerprint = %identity.fingerprint(), "loaded keypair");
            let _ = manager.identity.set(Arc::new(identity));
        }
        Ok(manager)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SecretsConfig {
        &self.config
    }

    /// Makes sure a keypair exists for `owner_id`, generating one if not.
    ///
    /// Idempotent: later calls return the same fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IdentityMismatch`] if `owner_id` is not the
    /// configured owner or the store belongs to another owner, and
    /// [`CryptoError::KeyGeneration`] if the keypair cannot be persisted.
    pub fn ensure_identity(&self, owner_id: &str) -> CryptoResult<Fingerprint> {
        if owner_id != self.config.owner_id {
            return Err(CryptoError::IdentityMismatch {
                expected: self.config.owner_id.clone(),
                found: owner_id.to_string(),
            });
        }
        if let Some(identity) = self.identity.get() {
            return Self::check_owner(identity, owner_id);
        }

        let path = self.config.identity_path();
        let generated = Identity::generate(owner_id);
        let created = generated
            .save(&path)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let identity = if created {
            tracing::info!(fingerprint = %generated.fingerprint(), "generated keypair");
            generated
        } else {
            // lost the race to another writer; use what is on disk
            Identity::load(&path)?.ok_or_else(|| {
                CryptoError::KeyGeneration("keypair store vanished after creation".into())
            })?
        };

        let identity = self.identity.get_or_init(|| Arc::new(identity));
        Self::check_owner(identity, owner_id)
    }

    fn check_owner(identity: &Identity, owner_id: &str) -> CryptoResult<Fingerprint> {
        if identity.owner_id() != owner_id {
            return Err(CryptoError::IdentityMismatch {
                expected: owner_id.to_string(),
                found: identity.owner_id().to_string(),
            });
        }
        Ok(identity.fingerprint())
    }

    /// Returns the loaded identity.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IdentityMissing`] before [`ensure_identity`](Self::ensure_identity).
    pub fn identity(&self) -> CryptoResult<Arc<Identity>> {
        self.identity
            .get()
            .cloned()
            .ok_or(CryptoError::IdentityMissing)
    }

    /// Returns the keypair fingerprint, if a keypair is loaded.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.identity.get().map(|identity| identity.fingerprint())
    }

    /// Makes sure an encrypted secret exists, generating one if not.
    ///
    /// A new secret is encrypted to the replica's own public key, signed by
    /// the same identity, and kept in memory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IdentityMissing`] if no keypair is loaded and
    /// [`CryptoError::KeyGeneration`] if the secret cannot be persisted.
    pub fn ensure_secret(&self) -> CryptoResult<()> {
        let identity = self.identity()?;
        let path = self.config.secret_path();
        // writes are atomic, so an existing file is a complete one
        if path.exists() {
            return Ok(());
        }

        let secret = Secret::generate(self.config.secret_length);
        let framed = Zeroizing::new(frame(secret.as_bytes(), Some(identity.as_ref())));
        let sealed = envelope::seal_asymmetric(identity.public(), &framed)?;
        let created = write_private_file(&path, armor(&sealed).as_bytes())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        if created {
            tracing::info!(length = secret.len(), "generated storage secret");
            let _ = self.secret.set(secret);
        }
        Ok(())
    }

    /// Decrypts the persisted secret into memory and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecretLoad`] if the file is missing,
    /// unreadable, or fails to decrypt or verify.
    pub fn load_secret(&self) -> CryptoResult<Secret> {
        if let Some(secret) = self.secret.get() {
            return Ok(secret.clone());
        }

        let identity = self
            .identity()
            .map_err(|e| CryptoError::SecretLoad(e.to_string()))?;
        let path = self.config.secret_path();
        let armored = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                CryptoError::SecretLoad(format!("{} does not exist", path.display()))
            }
            _ => CryptoError::SecretLoad(e.to_string()),
        })?;

        let secret = dearmor(&armored)
            .and_then(|sealed| envelope::open_asymmetric(&identity, &sealed))
            .and_then(|framed| unframe(&Zeroizing::new(framed), &[identity.public()]))
            .map_err(|e| CryptoError::SecretLoad(e.to_string()))?;
        let secret = String::from_utf8(secret)
            .map_err(|_| CryptoError::SecretLoad("secret is not valid UTF-8".into()))?;

        tracing::debug!("loaded storage secret");
        Ok(self.secret.get_or_init(|| Secret::from_string(secret)).clone())
    }

    /// Returns per-document crypto keyed by the loaded secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecretNotLoaded`] before [`load_secret`](Self::load_secret)
    /// or [`ensure_secret`](Self::ensure_secret) has put a secret in memory.
    pub fn document_crypto(&self) -> CryptoResult<DocumentCrypto> {
        self.secret
            .get()
            .map(DocumentCrypto::new)
            .ok_or(CryptoError::SecretNotLoaded)
    }

    /// Encrypts `data` and returns the armored ciphertext.
    ///
    /// Asymmetric mode encrypts to the replica's own public key. With
    /// `symmetric` set, the loaded secret is used as passphrase instead.
    /// `sign` names the signing identity by owner id or fingerprint; only
    /// the replica's own identity can sign.
    ///
    /// # Errors
    ///
    /// Returns an error if the required key material is not loaded or the
    /// signer is unknown.
    pub fn encrypt(&self, data: &[u8], sign: Option<&str>, symmetric: bool) -> CryptoResult<String> {
        let signer = match sign {
            Some(name) => {
                let identity = self.identity()?;
                if !identity.is_named(name) {
                    return Err(CryptoError::Signature(format!("no signing key for {name}")));
                }
                Some(identity)
            }
            None => None,
        };
        let framed = Zeroizing::new(frame(data, signer.as_deref()));

        let sealed = if symmetric {
            let secret = self.secret.get().ok_or(CryptoError::SecretNotLoaded)?;
            envelope::seal_symmetric(secret.as_bytes(), &framed)?
        } else {
            envelope::seal_asymmetric(self.identity()?.public(), &framed)?
        };
        Ok(armor(&sealed))
    }

    /// Decrypts armored ciphertext produced by [`encrypt`](Self::encrypt).
    ///
    /// A signature, if present, must verify against the replica's own key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key material is missing, the ciphertext is
    /// corrupted or of the other mode, or the signature does not verify.
    pub fn decrypt(&self, armored: &str, symmetric: bool) -> CryptoResult<Vec<u8>> {
        let sealed = dearmor(armored)?;
        let framed = if symmetric {
            let secret = self.secret.get().ok_or(CryptoError::SecretNotLoaded)?;
            envelope::open_symmetric(secret.as_bytes(), &sealed)?
        } else {
            envelope::open_asymmetric(&*self.identity()?, &sealed)?
        };
        let framed = Zeroizing::new(framed);

        match self.identity.get() {
            Some(identity) => unframe(&framed, &[identity.public()]),
            None => unframe(&framed, &[]),
        }
    }
}
