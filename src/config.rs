//! Configuration management for the Hookwork webhook engine.
//!
//! This module provides configuration options for every subsystem: inbound
//! verification (tolerance window, payload caps, header names), rate limiting,
//! replay protection, outbound delivery, and housekeeping. Configurations can
//! be built in code, loaded from TOML files, or overridden from environment
//! variables.

use crate::{
    rate_limit::{RateLimit, RateLimitKeying},
    retry::RetryPolicy,
};

use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

/// Module for serializing std::time::Duration as human-readable strings
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        if secs == 0 {
            serializer.serialize_str("0s")
        } else if secs % 3600 == 0 {
            serializer.serialize_str(&format!("{}h", secs / 3600))
        } else if secs % 60 == 0 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{}s", secs))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(D::Error::custom)
    }

    /// Parse a duration string like "30s", "5m", "1h", "90", etc.
    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();

        // Handle just numbers (assume seconds)
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        // Handle suffixed durations
        if s.len() < 2 {
            return Err(format!("Invalid duration format: {}", s));
        }

        let (num_str, suffix) = s.split_at(s.len() - 1);
        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

        match suffix {
            "s" => Ok(Duration::from_secs(num)),
            "m" => Ok(Duration::from_secs(num * 60)),
            "h" => Ok(Duration::from_secs(num * 3600)),
            "d" => Ok(Duration::from_secs(num * 86400)),
            _ => Err(format!(
                "Invalid duration suffix: {}. Use s, m, h, or d",
                suffix
            )),
        }
    }
}

/// Main configuration for the Hookwork webhook engine.
///
/// # Examples
///
/// ```rust
/// use hookwork::config::HookworkConfig;
///
/// // Create with defaults
/// let config = HookworkConfig::default();
///
/// // Use builder pattern
/// let config = HookworkConfig::new()
///     .with_timestamp_tolerance(std::time::Duration::from_secs(300))
///     .with_max_payload_bytes(1024 * 1024)
///     .with_max_concurrent_deliveries(10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HookworkConfig {
    /// Inbound verification configuration
    pub verification: VerificationConfig,

    /// Rate limiting configuration
    pub rate_limiting: RateLimitingConfig,

    /// Replay protection configuration
    pub replay: ReplayConfig,

    /// Outbound delivery configuration
    pub delivery: DeliveryConfig,

    /// Housekeeping configuration
    pub housekeeping: HousekeepingConfig,
}

impl HookworkConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timestamp tolerance window for inbound signatures
    pub fn with_timestamp_tolerance(mut self, tolerance: StdDuration) -> Self {
        self.verification.timestamp_tolerance = tolerance;
        self
    }

    /// Set the maximum accepted payload size in bytes
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.verification.max_payload_bytes = bytes;
        self
    }

    /// Set the maximum number of in-flight outbound deliveries
    pub fn with_max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.delivery.max_concurrent_deliveries = max;
        self
    }

    /// Set the default retry policy for outbound deliveries
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.delivery.retry = policy;
        self
    }

    /// Set the User-Agent header sent with outbound deliveries
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.delivery.user_agent = user_agent.to_string();
        self
    }

    /// Set the default rate limit applied per verification key
    pub fn with_default_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limiting.default_limit = limit;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        // Verification configuration
        if let Ok(tolerance) = std::env::var("HOOKWORK_TIMESTAMP_TOLERANCE_SECS") {
            if let Ok(seconds) = tolerance.parse::<u64>() {
                config.verification.timestamp_tolerance = StdDuration::from_secs(seconds);
            }
        }
        if let Ok(bytes) = std::env::var("HOOKWORK_MAX_PAYLOAD_BYTES") {
            config.verification.max_payload_bytes = bytes
                .parse()
                .unwrap_or(config.verification.max_payload_bytes);
        }

        // Rate limiting configuration
        if let Ok(requests) = std::env::var("HOOKWORK_RATE_LIMIT_REQUESTS") {
            config.rate_limiting.default_limit.requests = requests
                .parse()
                .unwrap_or(config.rate_limiting.default_limit.requests);
        }
        if let Ok(window) = std::env::var("HOOKWORK_RATE_LIMIT_WINDOW_SECS") {
            if let Ok(seconds) = window.parse::<u64>() {
                config.rate_limiting.default_limit.window_ms = seconds.saturating_mul(1_000);
            }
        }

        // Delivery configuration
        if let Ok(max) = std::env::var("HOOKWORK_MAX_CONCURRENT_DELIVERIES") {
            config.delivery.max_concurrent_deliveries = max
                .parse()
                .unwrap_or(config.delivery.max_concurrent_deliveries);
        }
        if let Ok(timeout) = std::env::var("HOOKWORK_REQUEST_TIMEOUT_SECS") {
            config.delivery.request_timeout_secs = timeout
                .parse()
                .unwrap_or(config.delivery.request_timeout_secs);
        }
        if let Ok(user_agent) = std::env::var("HOOKWORK_USER_AGENT") {
            config.delivery.user_agent = user_agent;
        }

        Ok(config)
    }
}

/// Inbound verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Maximum accepted signature age in either direction
    #[serde(with = "duration_secs")]
    pub timestamp_tolerance: StdDuration,

    /// Maximum payload size accepted before any HMAC work
    pub max_payload_bytes: usize,

    /// Signature header name (matched case-insensitively)
    pub signature_header: String,

    /// Authoritative timestamp header name
    pub timestamp_header: String,

    /// Event type header name
    pub event_header: String,

    /// Delivery id header name
    pub delivery_header: String,

    /// Headers that must be present for a request to be considered valid
    pub required_headers: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: StdDuration::from_secs(300), // 5 minutes
            max_payload_bytes: 1024 * 1024,                   // 1 MiB
            signature_header: "x-hub-signature-256".to_string(),
            timestamp_header: "x-hub-timestamp".to_string(),
            event_header: "x-hub-event".to_string(),
            delivery_header: "x-hub-delivery".to_string(),
            required_headers: vec!["user-agent".to_string(), "content-type".to_string()],
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether rate limiting is enforced during verification
    pub enabled: bool,

    /// Default limit applied when a source declares none
    pub default_limit: RateLimit,

    /// How verification keys are composed
    pub keying: RateLimitKeying,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: RateLimit::default(),
            keying: RateLimitKeying::PerSourceAndOrigin,
        }
    }
}

/// Replay protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Maximum number of nonce records kept in memory
    pub nonce_capacity: usize,

    /// Maximum age of a nonce record
    #[serde(with = "duration_secs")]
    pub nonce_ttl: StdDuration,

    /// How long delivery-id records are remembered
    #[serde(with = "duration_secs")]
    pub delivery_id_retention: StdDuration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            nonce_capacity: 10_000,
            nonce_ttl: StdDuration::from_secs(15 * 60), // 15 minutes
            delivery_id_retention: StdDuration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Outbound delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Default retry policy for deliveries whose source declares none
    pub retry: RetryPolicy,

    /// Maximum number of in-flight delivery attempts
    pub max_concurrent_deliveries: usize,

    /// Per-attempt network timeout in seconds
    pub request_timeout_secs: u64,

    /// Interval between pending-delivery sweeps
    #[serde(with = "duration_secs")]
    pub sweep_interval: StdDuration,

    /// User agent string for outbound requests
    pub user_agent: String,

    /// Whether to log delivery attempts
    pub log_deliveries: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent_deliveries: 10,
            request_timeout_secs: 30,
            sweep_interval: StdDuration::from_secs(5),
            user_agent: format!("hookwork/{}", env!("CARGO_PKG_VERSION")),
            log_deliveries: true,
        }
    }
}

/// Housekeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Interval between housekeeping sweeps
    #[serde(with = "duration_secs")]
    pub interval: StdDuration,

    /// How long terminal deliveries are retained before eviction
    #[serde(with = "duration_secs")]
    pub terminal_retention: StdDuration,

    /// Pending deliveries untouched for longer than this are expired
    #[serde(with = "duration_secs")]
    pub pending_ttl: StdDuration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(60),
            terminal_retention: StdDuration::from_secs(7 * 24 * 3600),
            pending_ttl: StdDuration::from_secs(24 * 3600),
        }
    }
}

/// Helper functions for creating configurations
impl HookworkConfig {
    /// Create a configuration for development use
    pub fn development() -> Self {
        Self {
            delivery: DeliveryConfig {
                sweep_interval: StdDuration::from_secs(1),
                log_deliveries: true,
                ..Default::default()
            },
            housekeeping: HousekeepingConfig {
                interval: StdDuration::from_secs(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for production use
    pub fn production() -> Self {
        Self {
            replay: ReplayConfig {
                nonce_capacity: 100_000,
                ..Default::default()
            },
            delivery: DeliveryConfig {
                max_concurrent_deliveries: 25,
                log_deliveries: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
