//! HMAC-SHA256 signing for outbound webhook bodies.
//!
//! When a signing secret is configured, every delivery carries
//! `X-Signature: <hex>` where the value is the lowercase hex HMAC-SHA256
//! of the exact request body. Receivers recompute and compare.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature generation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The secret key was rejected by the MAC.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecret => write!(f, "invalid signing secret"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Generates the HMAC-SHA256 signature as a lowercase hex string.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the secret key is rejected.
pub fn generate_hmac_hex(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex signature against a payload, in constant time.
///
/// Used by receiver-side tests; production receivers implement the same
/// comparison.
pub fn verify_hmac_hex(payload: &[u8], signature: &str, secret: &str) -> bool {
    match generate_hmac_hex(payload, secret) {
        Ok(expected) => timing_safe_eq(signature, &expected),
        Err(_) => false,
    }
}

/// Timing-safe string comparison to prevent timing attacks.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let first = generate_hmac_hex(b"payload", "secret").unwrap();
        let second = generate_hmac_hex(b"payload", "secret").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verification_round_trips() {
        let signature = generate_hmac_hex(b"payload", "secret").unwrap();
        assert!(verify_hmac_hex(b"payload", &signature, "secret"));
        assert!(!verify_hmac_hex(b"tampered", &signature, "secret"));
        assert!(!verify_hmac_hex(b"payload", &signature, "other-secret"));
    }

    #[test]
    fn timing_safe_eq_handles_lengths() {
        assert!(timing_safe_eq("same", "same"));
        assert!(!timing_safe_eq("same", "different"));
        assert!(!timing_safe_eq("same", "sam"));
    }
}
