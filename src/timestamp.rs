//! Timestamp freshness validation.
//!
//! The authoritative timestamp comes from the dedicated timestamp header when
//! it parses, falling back to the timestamp embedded in the signature header.
//! Validation is a pure function over epoch-millisecond integers so the
//! boundary conditions stay exactly testable.

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a successful freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCheck {
    /// Signed age in milliseconds (`now - timestamp`; negative means the
    /// timestamp is ahead of the local clock)
    pub drift_ms: i64,

    /// Set when the age exceeds half the tolerance window while remaining
    /// acceptable
    pub drift_warning: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FreshnessError {
    #[error("timestamp is older than the tolerance window")]
    TooOld,

    #[error("timestamp is further in the future than the tolerance window")]
    Future,
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Pick the authoritative timestamp: a parseable dedicated header overrides
/// the signature's embedded value.
pub fn resolve(timestamp_header: Option<&str>, signature_timestamp: i64) -> i64 {
    timestamp_header
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(signature_timestamp)
}

/// Validate `timestamp_ms` against `now_ms` within `tolerance`.
pub fn validate(
    timestamp_ms: i64,
    now_ms: i64,
    tolerance: Duration,
) -> Result<TimestampCheck, FreshnessError> {
    let tolerance_ms = tolerance.as_millis().min(i64::MAX as u128) as i64;
    let age = now_ms.saturating_sub(timestamp_ms);

    if age > tolerance_ms {
        return Err(FreshnessError::TooOld);
    }
    if age < -tolerance_ms {
        return Err(FreshnessError::Future);
    }

    Ok(TimestampCheck {
        drift_ms: age,
        drift_warning: age > tolerance_ms / 2,
    })
}
