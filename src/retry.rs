//! Retry policy and backoff for outbound webhook deliveries.
//!
//! Failed delivery attempts are rescheduled with capped exponential backoff
//! plus bounded jitter. The policy also decides which HTTP status codes are
//! worth retrying at all: server-side failures (5xx), request timeouts (408)
//! and throttling (429) are transient, while any other 4xx means the request
//! itself is wrong and will never succeed.
//!
//! # Examples
//!
//! ```rust
//! use hookwork::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default().with_jitter_max_ms(0);
//!
//! // Backoff doubles per attempt and is capped at max_delay_ms
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
//! assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30_000));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy applied between delivery attempts.
///
/// The delay before retry `n` (1-based) is
/// `min(initial_delay_ms * backoff_multiplier^(n - 1), max_delay_ms)` plus a
/// uniform random jitter of at most `jitter_max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before the delivery fails
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on the computed backoff delay, before jitter
    pub max_delay_ms: u64,
    /// Exponential growth factor (typically 2.0)
    pub backoff_multiplier: f64,
    /// Upper bound on the random jitter added to each delay
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_max_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Set the maximum number of delivery attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay_ms(mut self, initial_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    /// Set the backoff cap
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the exponential growth factor
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Set the jitter bound (0 disables jitter)
    pub fn with_jitter_max_ms(mut self, jitter_max_ms: u64) -> Self {
        self.jitter_max_ms = jitter_max_ms;
        self
    }

    /// Whether another attempt may be scheduled after `attempts` have run.
    pub fn has_attempts_remaining(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff before retry `attempt` (1-based), without jitter.
    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let multiplier = self.backoff_multiplier.powi(exponent as i32);
        let delay = self.initial_delay_ms as f64 * multiplier;

        // f64-to-u64 casts saturate, so an overflowing multiplier still caps
        delay.min(self.max_delay_ms as f64) as u64
    }

    /// Delay to wait before retry `attempt` (1-based), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max_ms)
        };

        Duration::from_millis(self.base_delay_ms(attempt).saturating_add(jitter_ms))
    }
}

/// Whether an HTTP response status is worth retrying.
///
/// Server errors, request timeouts and throttling are transient; every other
/// client error is terminal.
pub fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}
