//! ASCII armor for ciphertext that travels as text or sits in a file.

use crate::error::{CryptoError, CryptoResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const BEGIN: &str = "-----BEGIN SOLEDAD MESSAGE-----";
const END: &str = "-----END SOLEDAD MESSAGE-----";
const LINE_WIDTH: usize = 64;

/// Wraps binary ciphertext in a begin/end block of base64 lines.
pub fn armor(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 64);
    out.push_str(BEGIN);
    out.push('\n');
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(END);
    out.push('\n');
    out
}

/// Recovers the binary ciphertext from [`armor`] output.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidArmor`] if the markers are missing or the
/// body is not valid base64.
pub fn dearmor(text: &str) -> CryptoResult<Vec<u8>> {
    let text = text.trim();
    let body = text
        .strip_prefix(BEGIN)
        .and_then(|rest| rest.strip_suffix(END))
        .ok_or_else(|| CryptoError::InvalidArmor("missing armor markers".into()))?;

    let joined: String = body.split_whitespace().collect();
    STANDARD
        .decode(joined)
        .map_err(|e| CryptoError::InvalidArmor(e.to_string()))
}
