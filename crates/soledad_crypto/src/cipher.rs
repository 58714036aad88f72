//! AES-256-GCM primitives shared by every encryption mode.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the random salt used for passphrase-derived keys.
pub const SALT_SIZE: usize = 16;

/// A 256-bit symmetric key.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from high-entropy input key material with HKDF-SHA256.
    ///
    /// `info` binds the key to its purpose, so the same material can feed
    /// several independent keys.
    ///
    /// # Security Note
    ///
    /// HKDF is not a password hash. The inputs fed here are a randomly
    /// generated secret or a Diffie-Hellman output, both of which already
    /// carry full entropy.
    pub fn derive(ikm: &[u8], salt: &[u8], info: &[u8]) -> CryptoResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(info, &mut bytes)
            .map_err(|_| CryptoError::Encryption("HKDF expand failed".into()))?;

        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Authenticated encryption with one key.
///
/// Output format of every `seal*` method:
/// `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &SymmetricKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.seal_with_aad(plaintext, &[])
    }

    /// Decrypts data produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns an error if the data is truncated or fails authentication.
    pub fn open(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        self.open_with_aad(sealed, &[])
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// The associated data is not encrypted; it binds the ciphertext to
    /// metadata such as a document preamble.
    pub fn seal_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let mut sealed = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(self.seal_with_nonce(&nonce_bytes, plaintext, aad)?);
        Ok(sealed)
    }

    /// Decrypts data produced by [`seal_with_aad`](Self::seal_with_aad).
    ///
    /// The same AAD must be provided as was used during encryption.
    pub fn open_with_aad(&self, sealed: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.open_with_nonce(nonce, ciphertext, aad)
    }

    /// Encrypts with a caller-chosen nonce; returns `ciphertext || tag`.
    ///
    /// Used when the nonce travels separately, e.g. inside an
    /// authenticated preamble. A nonce must never repeat under one key.
    pub fn seal_with_nonce(
        &self,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        self.cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Encryption("AES-GCM encryption error".into()))
    }

    /// Decrypts `ciphertext || tag` with an explicit nonce.
    pub fn open_with_nonce(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption("invalid nonce length".into()));
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption("ciphertext too short".into()));
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Decryption("authentication failed".into()))
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

/// Fills a fresh array with random bytes.
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn key_wrong_size() {
        assert!(SymmetricKey::from_bytes(&[0u8; 16]).is_err());
        assert!(SymmetricKey::from_bytes(&[0u8; 64]).is_err());
        assert!(SymmetricKey::from_bytes(&[7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = AeadCipher::new(&SymmetricKey::generate());

        let sealed = cipher.seal(b"Hello, Soledad!").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"Hello, Soledad!");
        assert_eq!(cipher.open(&sealed).unwrap(), b"Hello, Soledad!");
    }

    #[test]
    fn seal_produces_different_ciphertext() {
        let cipher = AeadCipher::new(&SymmetricKey::generate());
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn open_wrong_key_fails() {
        let sealed = AeadCipher::new(&SymmetricKey::generate())
            .seal(b"secret")
            .unwrap();
        assert!(AeadCipher::new(&SymmetricKey::generate())
            .open(&sealed)
            .is_err());
    }

    #[test]
    fn open_corrupted_fails() {
        let cipher = AeadCipher::new(&SymmetricKey::generate());
        let mut sealed = cipher.seal(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(cipher.open(&sealed).is_err());
        assert!(cipher.open(&[0u8; 10]).is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let cipher = AeadCipher::new(&SymmetricKey::generate());
        let sealed = cipher.seal_with_aad(b"secret", b"doc-1").unwrap();
        assert_eq!(cipher.open_with_aad(&sealed, b"doc-1").unwrap(), b"secret");
        assert!(cipher.open_with_aad(&sealed, b"doc-2").is_err());
    }

    #[test]
    fn derive_is_deterministic() {
        let key1 = SymmetricKey::derive(b"material", b"salt", b"info").unwrap();
        let key2 = SymmetricKey::derive(b"material", b"salt", b"info").unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());

        let key3 = SymmetricKey::derive(b"material", b"other", b"info").unwrap();
        assert_ne!(key1.as_bytes(), key3.as_bytes());
        let key4 = SymmetricKey::derive(b"material", b"salt", b"other").unwrap();
        assert_ne!(key1.as_bytes(), key4.as_bytes());
    }

    #[test]
    fn empty_plaintext() {
        let cipher = AeadCipher::new(&SymmetricKey::generate());
        let sealed = cipher.seal(b"").unwrap();
        assert!(cipher.open(&sealed).unwrap().is_empty());
    }
}
