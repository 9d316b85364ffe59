//! Header normalization for inbound webhook requests.
//!
//! Incoming header maps arrive with arbitrary casing and padding depending on
//! the HTTP stack in front of the engine. Everything downstream (signature
//! lookup, required-header checks, source heuristics) works against the
//! normalized form produced here.

use std::collections::HashMap;

/// Signature header carried on inbound and outbound requests.
pub const SIGNATURE: &str = "X-Hub-Signature-256";

/// Authoritative delivery timestamp header (epoch milliseconds).
pub const TIMESTAMP: &str = "X-Hub-Timestamp";

/// Event type header.
pub const EVENT: &str = "X-Hub-Event";

/// Delivery id header.
pub const DELIVERY: &str = "X-Hub-Delivery";

/// Lower-case header keys and trim surrounding whitespace from values.
///
/// Duplicate keys that differ only in case collapse to a single entry; the
/// last one wins, matching how most HTTP stacks flatten repeated headers.
pub fn normalize(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

/// Look up a header by name against a normalized map.
pub fn get<'a>(normalized: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    normalized
        .get(&name.to_ascii_lowercase())
        .map(|value| value.as_str())
}

/// Return the first required header that is absent or empty, if any.
pub fn missing_required(normalized: &HashMap<String, String>, required: &[String]) -> Option<String> {
    required
        .iter()
        .find(|name| get(normalized, name).is_none_or(str::is_empty))
        .cloned()
}

/// Best-effort client origin used for rate-limit keying.
///
/// Prefers the first hop of `x-forwarded-for`, then `x-real-ip`. Requests
/// arriving without either collapse into a shared `unknown` bucket.
pub fn client_origin(normalized: &HashMap<String, String>) -> String {
    if let Some(forwarded) = get(normalized, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = get(normalized, "x-real-ip") {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    "unknown".to_string()
}
