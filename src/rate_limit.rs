//! Rate limiting for inbound verification.
//!
//! The verification pipeline consumes rate limiting through the
//! [`RateLimiter`] trait and never assumes a concrete implementation; a
//! denied decision short-circuits verification before any cryptographic work.
//! The bundled [`TokenBucketLimiter`] tracks one token bucket per key with
//! per-source limit overrides and a hard cap on tracked keys.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rate limit of `requests` per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum number of requests per time window
    pub requests: u32,
    /// Time window in milliseconds
    pub window_ms: u64,
}

impl RateLimit {
    /// Create a rate limit of X requests per second
    pub fn per_second(requests: u32) -> Self {
        Self {
            requests,
            window_ms: 1_000,
        }
    }

    /// Create a rate limit of X requests per minute
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window_ms: 60_000,
        }
    }

    /// Create a rate limit of X requests per hour
    pub fn per_hour(requests: u32) -> Self {
        Self {
            requests,
            window_ms: 3_600_000,
        }
    }

    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Calculate the refill rate in tokens per millisecond
    fn refill_rate_per_ms(&self) -> f64 {
        self.requests as f64 / self.window_ms.max(1) as f64
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// How verification rate-limit keys are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeying {
    /// One bucket per source
    PerSource,
    /// One bucket per source and client origin
    PerSourceAndOrigin,
}

impl RateLimitKeying {
    /// Compose the key the limiter is consulted with.
    pub fn key(&self, source_id: &str, origin: &str) -> String {
        match self {
            RateLimitKeying::PerSource => source_id.to_string(),
            RateLimitKeying::PerSourceAndOrigin => format!("{}:{}", source_id, origin),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The limit in force for this key
    pub limit: u32,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// When the bucket is fully replenished
    pub reset_at: DateTime<Utc>,
}

/// Rate limiting as consumed by the verification pipeline.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one request's worth of budget for `key`.
    async fn check_and_consume(&self, key: &str) -> Result<RateLimitDecision>;

    /// Drop stale per-key state, returning how many records were removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Apply a per-source limit override. Implementations without override
    /// support may ignore this.
    async fn set_source_limit(&self, _source_id: &str, _limit: RateLimit) {}
}

/// Token bucket rate limiter state for a single key.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum capacity
    capacity: f64,
    /// Refill rate in tokens per millisecond
    refill_rate: f64,
    /// Last refill timestamp
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: &RateLimit) -> Self {
        Self {
            tokens: limit.requests as f64,
            capacity: limit.requests as f64,
            refill_rate: limit.refill_rate_per_ms(),
            last_refill: Instant::now(),
        }
    }

    /// Try to consume one token. Returns false when the bucket is empty.
    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let tokens_to_add = self.refill_rate * elapsed.as_millis() as f64;

        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }

    /// Whole tokens currently available.
    fn remaining(&mut self) -> u32 {
        self.refill();
        self.tokens.max(0.0) as u32
    }

    /// Time until the bucket is back at capacity.
    fn time_until_full(&mut self) -> Duration {
        self.refill();

        if self.tokens >= self.capacity || self.refill_rate <= 0.0 {
            Duration::from_millis(0)
        } else {
            let deficit = self.capacity - self.tokens;
            let ms_needed = (deficit / self.refill_rate).ceil() as u64;
            Duration::from_millis(ms_needed)
        }
    }

    /// A bucket back at capacity carries no state worth keeping.
    fn is_idle(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }
}

/// In-memory per-key token bucket [`RateLimiter`].
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    overrides: Mutex<HashMap<String, RateLimit>>,
    default_limit: RateLimit,
    max_tracked_keys: usize,
}

impl TokenBucketLimiter {
    /// Limiter applying `default_limit` to every key without an override.
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
            default_limit,
            max_tracked_keys: 10_000,
        }
    }

    /// Cap the number of tracked keys (idle buckets are dropped when the cap
    /// is hit).
    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max.max(1);
        self
    }

    async fn limit_for(&self, key: &str) -> RateLimit {
        let overrides = self.overrides.lock().await;
        key.split(':')
            .next()
            .and_then(|source_id| overrides.get(source_id).copied())
            .unwrap_or(self.default_limit)
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("default_limit", &self.default_limit)
            .field("max_tracked_keys", &self.max_tracked_keys)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn check_and_consume(&self, key: &str) -> Result<RateLimitDecision> {
        let limit = self.limit_for(key).await;
        let mut buckets = self.buckets.lock().await;

        // Hard cap on tracked keys: make room by dropping idle buckets
        if buckets.len() >= self.max_tracked_keys && !buckets.contains_key(key) {
            buckets.retain(|_, bucket| !bucket.is_idle());
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(&limit));

        // A limit override applied after the bucket was created resizes it
        if bucket.capacity != limit.requests as f64 {
            *bucket = TokenBucket::new(&limit);
        }

        let allowed = bucket.try_consume();
        let remaining = bucket.remaining();
        let reset_in = chrono::Duration::from_std(bucket.time_until_full())
            .unwrap_or_else(|_| chrono::Duration::zero());

        Ok(RateLimitDecision {
            allowed,
            limit: limit.requests,
            remaining,
            reset_at: Utc::now() + reset_in,
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_idle());
        Ok(before - buckets.len())
    }

    /// Apply a per-source limit. Keys carry the source id as their first
    /// `:`-separated segment, so the override covers every origin of that
    /// source.
    async fn set_source_limit(&self, source_id: &str, limit: RateLimit) {
        let mut overrides = self.overrides.lock().await;
        overrides.insert(source_id.to_string(), limit);
    }
}
