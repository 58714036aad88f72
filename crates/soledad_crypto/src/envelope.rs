//! Binary message envelopes for asymmetric and passphrase encryption.
//!
//! ## Layout
//!
//! Asymmetric: `0x01 || recipient fingerprint (20) || ephemeral X25519 key (32) || sealed`
//!
//! Symmetric: `0x02 || salt (16) || sealed`
//!
//! `sealed` is AES-256-GCM output (`nonce || ciphertext || tag`) with the
//! envelope header as AAD. The plaintext inside is framed as
//! `flags (1) [|| signer fingerprint (20) || Ed25519 signature (64)] || data`.

use crate::cipher::{random_bytes, AeadCipher, SymmetricKey, SALT_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::{Fingerprint, Identity, PublicIdentity, FINGERPRINT_SIZE};
use ed25519_dalek::{Signature, Signer, Verifier, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};

const KIND_ASYMMETRIC: u8 = 1;
const KIND_SYMMETRIC: u8 = 2;
const FLAG_SIGNED: u8 = 0x01;
const ASYMMETRIC_INFO: &[u8] = b"soledad-asymmetric-v1";
const SYMMETRIC_INFO: &[u8] = b"soledad-symmetric-v1";
const ASYMMETRIC_HEADER: usize = 1 + FINGERPRINT_SIZE + 32;
const SYMMETRIC_HEADER: usize = 1 + SALT_SIZE;

/// Which kind of envelope a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Encrypted to a public key.
    Asymmetric,
    /// Encrypted under a passphrase.
    Symmetric,
}

/// Returns the envelope kind of `bytes`, if it is one.
pub fn envelope_kind(bytes: &[u8]) -> Option<EnvelopeKind> {
    match bytes.first() {
        Some(&KIND_ASYMMETRIC) => Some(EnvelopeKind::Asymmetric),
        Some(&KIND_SYMMETRIC) => Some(EnvelopeKind::Symmetric),
        _ => None,
    }
}

/// Frames `data`, signing it with `signer` when given.
pub(crate) fn frame(data: &[u8], signer: Option<&Identity>) -> Vec<u8> {
    match signer {
        Some(identity) => {
            let signature = identity.signing_key().sign(data);
            let mut framed =
                Vec::with_capacity(1 + FINGERPRINT_SIZE + SIGNATURE_LENGTH + data.len());
            framed.push(FLAG_SIGNED);
            framed.extend_from_slice(identity.fingerprint().as_bytes());
            framed.extend_from_slice(&signature.to_bytes());
            framed.extend_from_slice(data);
            framed
        }
        None => {
            let mut framed = Vec::with_capacity(1 + data.len());
            framed.push(0);
            framed.extend_from_slice(data);
            framed
        }
    }
}

/// Strips the framing, verifying a signature against `known` signers.
///
/// # Errors
///
/// Returns [`CryptoError::Signature`] if the message is signed by an
/// unknown key or the signature does not verify.
pub(crate) fn unframe(framed: &[u8], known: &[&PublicIdentity]) -> CryptoResult<Vec<u8>> {
    let (&flags, rest) = framed
        .split_first()
        .ok_or_else(|| CryptoError::Decryption("empty plaintext frame".into()))?;

    if flags & FLAG_SIGNED == 0 {
        return Ok(rest.to_vec());
    }
    if rest.len() < FINGERPRINT_SIZE + SIGNATURE_LENGTH {
        return Err(CryptoError::Signature("truncated signature block".into()));
    }

    let (fingerprint, rest) = rest.split_at(FINGERPRINT_SIZE);
    let (signature, data) = rest.split_at(SIGNATURE_LENGTH);

    let mut fp = [0u8; FINGERPRINT_SIZE];
    fp.copy_from_slice(fingerprint);
    let fingerprint = Fingerprint::from_bytes(fp);
    let signer = known
        .iter()
        .find(|public| public.fingerprint == fingerprint)
        .ok_or_else(|| CryptoError::Signature(format!("unknown signer {fingerprint}")))?;

    let mut sig = [0u8; SIGNATURE_LENGTH];
    sig.copy_from_slice(signature);
    signer
        .verifying
        .verify(data, &Signature::from_bytes(&sig))
        .map_err(|_| CryptoError::Signature(format!("bad signature from {fingerprint}")))?;

    Ok(data.to_vec())
}

/// Encrypts `framed` to `recipient` with an ephemeral X25519 key.
pub(crate) fn seal_asymmetric(recipient: &PublicIdentity, framed: &[u8]) -> CryptoResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient.encryption);

    let mut header = Vec::with_capacity(ASYMMETRIC_HEADER);
    header.push(KIND_ASYMMETRIC);
    header.extend_from_slice(recipient.fingerprint.as_bytes());
    header.extend_from_slice(ephemeral_public.as_bytes());

    let key = asymmetric_key(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient.encryption)?;
    let sealed = AeadCipher::new(&key).seal_with_aad(framed, &header)?;

    let mut out = header;
    out.extend(sealed);
    Ok(out)
}

/// Decrypts an asymmetric envelope addressed to `identity`.
pub(crate) fn open_asymmetric(identity: &Identity, bytes: &[u8]) -> CryptoResult<Vec<u8>> {
    if envelope_kind(bytes) != Some(EnvelopeKind::Asymmetric) {
        return Err(CryptoError::Decryption(
            "not an asymmetrically encrypted message".into(),
        ));
    }
    if bytes.len() < ASYMMETRIC_HEADER {
        return Err(CryptoError::Decryption("truncated envelope".into()));
    }
    let (header, sealed) = bytes.split_at(ASYMMETRIC_HEADER);
    if &header[1..1 + FINGERPRINT_SIZE] != identity.fingerprint().as_bytes() {
        return Err(CryptoError::Decryption(format!(
            "message is not addressed to {}",
            identity.fingerprint()
        )));
    }

    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&header[1 + FINGERPRINT_SIZE..]);
    let ephemeral_public = PublicKey::from(ephemeral);
    let shared = identity.encryption_secret().diffie_hellman(&ephemeral_public);

    let key = asymmetric_key(shared.as_bytes(), &ephemeral, &identity.public().encryption)?;
    AeadCipher::new(&key).open_with_aad(sealed, header)
}

fn asymmetric_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient: &PublicKey,
) -> CryptoResult<SymmetricKey> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(recipient.as_bytes());
    SymmetricKey::derive(shared, &salt, ASYMMETRIC_INFO)
}

/// Encrypts `framed` under a key derived from `passphrase`.
pub(crate) fn seal_symmetric(passphrase: &[u8], framed: &[u8]) -> CryptoResult<Vec<u8>> {
    let salt: [u8; SALT_SIZE] = random_bytes();
    let mut header = Vec::with_capacity(SYMMETRIC_HEADER);
    header.push(KIND_SYMMETRIC);
    header.extend_from_slice(&salt);

    let key = SymmetricKey::derive(passphrase, &salt, SYMMETRIC_INFO)?;
    let sealed = AeadCipher::new(&key).seal_with_aad(framed, &header)?;

    let mut out = header;
    out.extend(sealed);
    Ok(out)
}

/// Decrypts a symmetric envelope with `passphrase`.
pub(crate) fn open_symmetric(passphrase: &[u8], bytes: &[u8]) -> CryptoResult<Vec<u8>> {
    if envelope_kind(bytes) != Some(EnvelopeKind::Symmetric) {
        return Err(CryptoError::Decryption(
            "not a symmetrically encrypted message".into(),
        ));
    }
    if bytes.len() < SYMMETRIC_HEADER {
        return Err(CryptoError::Decryption("truncated envelope".into()));
    }
    let (header, sealed) = bytes.split_at(SYMMETRIC_HEADER);
    let key = SymmetricKey::derive(passphrase, &header[1..], SYMMETRIC_INFO)?;
    AeadCipher::new(&key).open_with_aad(sealed, header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetric_roundtrip() {
        let alice = Identity::generate("alice");
        let sealed = seal_asymmetric(alice.public(), &frame(b"hello", None)).unwrap();
        assert_eq!(envelope_kind(&sealed), Some(EnvelopeKind::Asymmetric));

        let framed = open_asymmetric(&alice, &sealed).unwrap();
        assert_eq!(unframe(&framed, &[]).unwrap(), b"hello");
    }

    #[test]
    fn asymmetric_wrong_recipient() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let sealed = seal_asymmetric(alice.public(), &frame(b"for alice", None)).unwrap();
        assert!(open_asymmetric(&bob, &sealed).is_err());
    }

    #[test]
    fn signed_frame_verifies() {
        let alice = Identity::generate("alice");
        let framed = frame(b"signed data", Some(&alice));
        assert_eq!(unframe(&framed, &[alice.public()]).unwrap(), b"signed data");
    }

    #[test]
    fn signed_frame_unknown_signer() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let framed = frame(b"data", Some(&alice));
        assert!(matches!(
            unframe(&framed, &[bob.public()]),
            Err(CryptoError::Signature(_))
        ));
    }

    #[test]
    fn signed_frame_tampered() {
        let alice = Identity::generate("alice");
        let mut framed = frame(b"data", Some(&alice));
        let last = framed.len() - 1;
        framed[last] ^= 0x01;
        assert!(matches!(
            unframe(&framed, &[alice.public()]),
            Err(CryptoError::Signature(_))
        ));
    }

    #[test]
    fn symmetric_roundtrip() {
        let sealed = seal_symmetric(b"passphrase", &frame(b"payload", None)).unwrap();
        assert_eq!(envelope_kind(&sealed), Some(EnvelopeKind::Symmetric));
        let framed = open_symmetric(b"passphrase", &sealed).unwrap();
        assert_eq!(unframe(&framed, &[]).unwrap(), b"payload");
        assert!(open_symmetric(b"wrong", &sealed).is_err());
    }

    #[test]
    fn kind_mismatch_rejected() {
        let alice = Identity::generate("alice");
        let sym = seal_symmetric(b"pass", &frame(b"x", None)).unwrap();
        assert!(open_asymmetric(&alice, &sym).is_err());
        let asym = seal_asymmetric(alice.public(), &frame(b"x", None)).unwrap();
        assert!(open_symmetric(b"pass", &asym).is_err());
        assert_eq!(envelope_kind(b""), None);
    }
}
