//! HMAC-SHA256 signing and verification.
//!
//! The signing string binds signature validity to both content and time:
//! `"{timestamp}.{raw_body}"`, with the timestamp in epoch milliseconds and
//! the body taken as raw bytes. Signature values are accepted in hex or
//! base64. Comparison is constant time and does not early-return on length
//! mismatch, so neither content nor length leaks through timing.
//!
//! The payload size cap is enforced before any MAC computation to bound the
//! CPU cost of adversarial bodies.

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only signature algorithm verification accepts.
pub const SUPPORTED_ALGORITHM: &str = "sha256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("payload exceeds the configured size limit")]
    PayloadTooLarge,

    #[error("signature does not match the computed value")]
    Mismatch,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature computation failed: {0}")]
    Internal(String),
}

/// Build the canonical signing string for a timestamped payload.
pub fn signing_string(timestamp_ms: i64, raw_body: &[u8]) -> Vec<u8> {
    let mut buf = format!("{}.", timestamp_ms).into_bytes();
    buf.extend_from_slice(raw_body);
    buf
}

/// HMAC-SHA256 over an arbitrary message, hex-encoded.
pub fn hmac_hex(secret: &str, message: &[u8]) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sign a timestamped payload, returning the hex signature value.
pub fn sign(secret: &str, timestamp_ms: i64, raw_body: &[u8]) -> Result<String, CryptoError> {
    hmac_hex(secret, &signing_string(timestamp_ms, raw_body))
}

/// Verify a provided signature against the recomputed one.
///
/// The size cap and algorithm check both run before the MAC is computed.
pub fn verify(
    secret: &str,
    timestamp_ms: i64,
    raw_body: &[u8],
    algorithm: &str,
    provided_signature: &str,
    max_payload_bytes: usize,
) -> Result<(), CryptoError> {
    if raw_body.len() > max_payload_bytes {
        return Err(CryptoError::PayloadTooLarge);
    }
    if algorithm != SUPPORTED_ALGORITHM {
        return Err(CryptoError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(&signing_string(timestamp_ms, raw_body));
    let expected = mac.finalize().into_bytes();

    match decode_signature(provided_signature) {
        Some(provided) if constant_time_eq(&expected, &provided) => Ok(()),
        _ => Err(CryptoError::Mismatch),
    }
}

/// Decode a signature value, trying hex first and base64 second.
fn decode_signature(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(bytes) = hex::decode(value) {
        return Some(bytes);
    }
    general_purpose::STANDARD.decode(value).ok()
}

/// Constant-time byte equality without an early length return.
///
/// A length mismatch folds into the accumulator while the loop still walks
/// the longer input, so comparison time depends only on the longer length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = u8::from(a.len() != b.len());
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cret...32chars";
    const TS: i64 = 1_700_000_000_000;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let hex = hmac_hex("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signing_string_layout() {
        let s = signing_string(TS, b"{\"event\":\"push\"}");
        assert_eq!(s, b"1700000000000.{\"event\":\"push\"}");
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let body = br#"{"event":"push","delivery_id":"d-1"}"#;
        let sig = sign(SECRET, TS, body).unwrap();
        assert!(verify(SECRET, TS, body, "sha256", &sig, 1024 * 1024).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let body = b"{\"event\":\"push\"}".to_vec();
        let sig = sign(SECRET, TS, &body).unwrap();

        let mut tampered = body.clone();
        tampered[2] ^= 0x01;
        assert_eq!(
            verify(SECRET, TS, &tampered, "sha256", &sig, 1024 * 1024),
            Err(CryptoError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let body = b"{\"event\":\"push\"}";
        let sig = sign(SECRET, TS, body).unwrap();

        let mut chars: Vec<char> = sig.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(
            verify(SECRET, TS, body, "sha256", &tampered, 1024 * 1024),
            Err(CryptoError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_timestamp_rejected() {
        let body = b"{\"event\":\"push\"}";
        let sig = sign(SECRET, TS, body).unwrap();
        assert_eq!(
            verify(SECRET, TS + 1, body, "sha256", &sig, 1024 * 1024),
            Err(CryptoError::Mismatch)
        );
    }

    #[test]
    fn test_base64_signature_accepted() {
        let body = b"{\"event\":\"push\"}";
        let hex_sig = sign(SECRET, TS, body).unwrap();
        let b64_sig = general_purpose::STANDARD.encode(hex::decode(&hex_sig).unwrap());

        assert!(verify(SECRET, TS, body, "sha256", &b64_sig, 1024 * 1024).is_ok());
    }

    #[test]
    fn test_undecodable_signature_rejected() {
        let body = b"{}";
        assert_eq!(
            verify(SECRET, TS, body, "sha256", "!!not-a-signature!!", 1024),
            Err(CryptoError::Mismatch)
        );
        assert_eq!(
            verify(SECRET, TS, body, "sha256", "", 1024),
            Err(CryptoError::Mismatch)
        );
    }

    #[test]
    fn test_payload_size_cap() {
        let body = vec![b'x'; 1025];
        let sig = sign(SECRET, TS, &body).unwrap();
        assert_eq!(
            verify(SECRET, TS, &body, "sha256", &sig, 1024),
            Err(CryptoError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_unsupported_algorithm() {
        let body = b"{}";
        let sig = sign(SECRET, TS, body).unwrap();
        assert_eq!(
            verify(SECRET, TS, body, "md5", &sig, 1024),
            Err(CryptoError::UnsupportedAlgorithm("md5".to_string()))
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(!constant_time_eq(b"", b"a"));
        // Length difference of 256 must still register
        assert!(!constant_time_eq(&[0u8; 2], &[0u8; 258]));
    }
}
