//! Per-document blob encryption.
//!
//! Every document is sealed with its own AES-256-GCM key,
//! `HMAC-SHA256(secret, doc_id)`. A binary preamble is authenticated as
//! AAD and travels next to the ciphertext:
//!
//! ```text
//! magic (0x13 0x37) | scheme (1) | method (1) | timestamp (u64 BE)
//! | nonce (12) | doc_id len (u16 BE) | doc_id | rev len (u16 BE) | rev
//! | size ceiling (u64 BE)
//! ```
//!
//! The wire form is the JSON text `{"raw": "<preamble> <ciphertext>"}`
//! with both parts in unpadded URL-safe base64.

use crate::cipher::{random_bytes, AeadCipher, SymmetricKey, NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::secret::Secret;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: [u8; 2] = [0x13, 0x37];
const SCHEME_SYMKEY: u8 = 1;
const METHOD_AES_256_GCM: u8 = 2;
const MIN_CEILING: u64 = 4096;

/// Prefix every symmetrically encrypted document starts with.
///
/// `EzcB` is the base64 of magic plus the symkey scheme byte.
pub const ENCRYPTED_PREFIX: &str = "{\"raw\": \"EzcB";

/// Returns true if `content` is a document blob from [`DocumentCrypto`].
pub fn is_symmetrically_encrypted(content: &[u8]) -> bool {
    content.starts_with(ENCRYPTED_PREFIX.as_bytes())
}

/// Smallest power of two that is at least `len` and at least 4096.
pub fn size_ceiling(len: usize) -> u64 {
    (len as u64).max(MIN_CEILING).next_power_of_two()
}

#[derive(Deserialize)]
struct RawBlob {
    raw: String,
}

struct Preamble {
    timestamp: u64,
    nonce: [u8; NONCE_SIZE],
    doc_id: String,
    rev: String,
    ceiling: u64,
}

impl Preamble {
    fn encode(&self) -> CryptoResult<Vec<u8>> {
        let mut out =
            Vec::with_capacity(4 + 8 + NONCE_SIZE + 4 + self.doc_id.len() + self.rev.len() + 8);
        out.extend_from_slice(&MAGIC);
        out.push(SCHEME_SYMKEY);
        out.push(METHOD_AES_256_GCM);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce);
        for field in [&self.doc_id, &self.rev] {
            let len = u16::try_from(field.len())
                .map_err(|_| CryptoError::Encryption(format!("field too long: {} bytes", field.len())))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(&self.ceiling.to_be_bytes());
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> CryptoResult<Self> {
        let mut reader = Reader { bytes };
        if reader.take(2)? != MAGIC {
            return Err(CryptoError::InvalidBlob("bad magic".into()));
        }
        let scheme = reader.take(1)?[0];
        if scheme != SCHEME_SYMKEY {
            return Err(CryptoError::InvalidBlob(format!("unsupported scheme {scheme}")));
        }
        let method = reader.take(1)?[0];
        if method != METHOD_AES_256_GCM {
            return Err(CryptoError::InvalidBlob(format!("unsupported method {method}")));
        }
        let timestamp = reader.u64()?;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(reader.take(NONCE_SIZE)?);
        let doc_id = reader.string()?;
        let rev = reader.string()?;
        let ceiling = reader.u64()?;
        if !reader.bytes.is_empty() {
            return Err(CryptoError::InvalidBlob("trailing preamble bytes".into()));
        }
        Ok(Self {
            timestamp,
            nonce,
            doc_id,
            rev,
            ceiling,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CryptoResult<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(CryptoError::InvalidBlob("truncated preamble".into()));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u64(&mut self) -> CryptoResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn string(&mut self) -> CryptoResult<String> {
        let mut len = [0u8; 2];
        len.copy_from_slice(self.take(2)?);
        let raw = self.take(usize::from(u16::from_be_bytes(len)))?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| CryptoError::InvalidBlob("preamble field is not UTF-8".into()))
    }
}

/// Encrypts and decrypts document contents under the replica secret.
///
/// Cheap to clone; shared by the encrypter and decrypter pools.
#[derive(Clone, Debug)]
pub struct DocumentCrypto {
    secret: Secret,
}

impl DocumentCrypto {
    /// Creates document crypto keyed by `secret`.
    pub fn new(secret: &Secret) -> Self {
        Self {
            secret: secret.clone(),
        }
    }

    fn doc_key(&self, doc_id: &str) -> CryptoResult<SymmetricKey> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        mac.update(doc_id.as_bytes());
        SymmetricKey::from_bytes(&mac.finalize().into_bytes())
    }

    /// Encrypts `content` of document `doc_id` at revision `rev`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the id or revision is too
    /// long for the preamble or the cipher fails.
    pub fn encrypt_doc(&self, doc_id: &str, rev: &str, content: &[u8]) -> CryptoResult<String> {
        let preamble = Preamble {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            nonce: random_bytes(),
            doc_id: doc_id.to_string(),
            rev: rev.to_string(),
            ceiling: size_ceiling(content.len()),
        };
        let aad = preamble.encode()?;
        let cipher = AeadCipher::new(&self.doc_key(doc_id)?);
        let sealed = cipher.seal_with_nonce(&preamble.nonce, content, &aad)?;

        Ok(format!(
            "{{\"raw\": \"{} {}\"}}",
            URL_SAFE_NO_PAD.encode(&aad),
            URL_SAFE_NO_PAD.encode(&sealed)
        ))
    }

    /// Decrypts a blob produced by [`encrypt_doc`](Self::encrypt_doc).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidBlob`] if the blob is malformed or
    /// was made for another document or revision, and
    /// [`CryptoError::Decryption`] if authentication fails.
    pub fn decrypt_doc(&self, doc_id: &str, rev: &str, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        let raw: RawBlob = serde_json::from_slice(blob)
            .map_err(|e| CryptoError::InvalidBlob(format!("not a blob: {e}")))?;
        let (preamble_b64, ciphertext_b64) = raw
            .raw
            .split_once(' ')
            .ok_or_else(|| CryptoError::InvalidBlob("missing ciphertext".into()))?;
        let aad = URL_SAFE_NO_PAD
            .decode(preamble_b64)
            .map_err(|e| CryptoError::InvalidBlob(format!("bad preamble encoding: {e}")))?;
        let sealed = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|e| CryptoError::InvalidBlob(format!("bad ciphertext encoding: {e}")))?;

        let preamble = Preamble::decode(&aad)?;
        if preamble.doc_id != doc_id {
            return Err(CryptoError::InvalidBlob(format!(
                "blob belongs to document {}, not {doc_id}",
                preamble.doc_id
            )));
        }
        if preamble.rev != rev {
            return Err(CryptoError::InvalidBlob(format!(
                "blob is for revision {}, not {rev}",
                preamble.rev
            )));
        }

        let cipher = AeadCipher::new(&self.doc_key(doc_id)?);
        let content = cipher.open_with_nonce(&preamble.nonce, &sealed, &aad)?;
        if content.len() as u64 > preamble.ceiling {
            return Err(CryptoError::InvalidBlob("content exceeds size ceiling".into()));
        }
        tracing::trace!(doc_id, rev, timestamp = preamble.timestamp, "decrypted document");
        Ok(content)
    }
}
