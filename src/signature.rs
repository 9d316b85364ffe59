//! Signature header parsing.
//!
//! Two wire forms are accepted. The simple form is a single `algo=value`
//! token, e.g. `sha256=b1946ac9...`. The structured form is a comma-separated
//! list of `key=value` pairs over a closed key set:
//!
//! ```text
//! algorithm=sha256,signature=b1946ac9...,timestamp=1700000000000,keyid=k1
//! ```
//!
//! Recognized structured keys are `algorithm`, `sha256` (shorthand for
//! algorithm plus signature), `signature`, `timestamp`/`t`, and `keyid`.
//! Unknown keys are ignored so senders can add fields without breaking
//! verification. Parsing never panics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed signature header. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSignature {
    /// Signature algorithm, lower-cased (`sha256` is the only one verified)
    pub algorithm: String,

    /// Signature value as transmitted (hex or base64)
    pub signature: String,

    /// Embedded timestamp in epoch milliseconds; defaults to the parse
    /// instant when the header carries none
    pub timestamp: i64,

    /// Optional key identifier for sources with rotating secrets
    pub key_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureParseError {
    #[error("signature header is empty")]
    Empty,

    #[error("signature header carries neither an algorithm nor a signature")]
    MissingParts,
}

/// Keys recognized in the structured form. Anything else is skipped.
const STRUCTURED_KEYS: [&str; 5] = ["algorithm", "sha256", "signature", "timestamp", "t"];

/// Parse a signature header value.
///
/// `now_ms` seeds the timestamp for headers that do not embed one; the
/// caller validates the resolved timestamp separately against the trusted
/// timestamp header.
pub fn parse(header_value: &str, now_ms: i64) -> Result<WebhookSignature, SignatureParseError> {
    let value = header_value.trim();
    if value.is_empty() {
        return Err(SignatureParseError::Empty);
    }

    if value.contains(',') || is_structured_pair(value) {
        parse_structured(value, now_ms)
    } else {
        parse_simple(value, now_ms)
    }
}

/// A comma-free value like `signature=...` still belongs to the structured
/// form when its key is one of the recognized structured keys; `sha1=...`
/// stays in the simple form with `sha1` as the algorithm.
fn is_structured_pair(value: &str) -> bool {
    match value.split_once('=') {
        Some((key, _)) => {
            let key = key.trim().to_ascii_lowercase();
            STRUCTURED_KEYS.contains(&key.as_str()) || key == "keyid"
        }
        None => false,
    }
}

fn parse_simple(value: &str, now_ms: i64) -> Result<WebhookSignature, SignatureParseError> {
    let (algorithm, signature) = value
        .split_once('=')
        .ok_or(SignatureParseError::MissingParts)?;

    let algorithm = algorithm.trim().to_ascii_lowercase();
    let signature = signature.trim();
    if algorithm.is_empty() && signature.is_empty() {
        return Err(SignatureParseError::MissingParts);
    }

    Ok(WebhookSignature {
        algorithm,
        signature: signature.to_string(),
        timestamp: now_ms,
        key_id: None,
    })
}

fn parse_structured(value: &str, now_ms: i64) -> Result<WebhookSignature, SignatureParseError> {
    let mut algorithm: Option<String> = None;
    let mut signature: Option<String> = None;
    let mut timestamp: Option<i64> = None;
    let mut key_id: Option<String> = None;

    for part in value.split(',') {
        let Some((key, part_value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let part_value = part_value.trim();

        match key.as_str() {
            "algorithm" => algorithm = Some(part_value.to_ascii_lowercase()),
            "sha256" => {
                algorithm = Some("sha256".to_string());
                signature = Some(part_value.to_string());
            }
            "signature" => signature = Some(part_value.to_string()),
            "timestamp" | "t" => timestamp = part_value.parse().ok(),
            "keyid" => key_id = Some(part_value.to_string()),
            _ => {}
        }
    }

    if algorithm.is_none() && signature.is_none() {
        return Err(SignatureParseError::MissingParts);
    }

    Ok(WebhookSignature {
        // A bare signature without an algorithm key defaults to sha256
        algorithm: algorithm.unwrap_or_else(|| "sha256".to_string()),
        signature: signature.unwrap_or_default(),
        timestamp: timestamp.unwrap_or(now_ms),
        key_id,
    })
}
