//! # Hookwork
//!
//! A webhook verification and delivery engine for Rust.
//!
//! ## Features
//!
//! - **Signature verification**: HMAC-SHA256 over `"{timestamp}.{body}"` with
//!   constant-time comparison; signature headers in simple (`sha256=<hex>`)
//!   or structured (`key=value,key=value`) form
//! - **Timestamp validation**: configurable tolerance window with soft drift
//!   warnings before the hard cutoff
//! - **Replay prevention**: delivery-id and nonce dedupe with bounded,
//!   age-limited state
//! - **Source management**: per-source secrets, event allow-lists, rate
//!   limits, and retry policies
//! - **Rate limiting**: token-bucket limiting keyed by source and origin,
//!   applied before any cryptographic work
//! - **Outbound delivery**: signed deliveries with exponential-backoff retry,
//!   jitter, and bounded-concurrency sweeps
//! - **Async/await**: built on Tokio for high concurrency
//! - **Pluggable state**: rate limiter, replay stores, and HTTP transport sit
//!   behind traits so deployments can swap in shared backends
//!
//! ## Quick Start
//!
//! ```rust
//! use hookwork::{HookworkConfig, SourceRegistry, WebhookSource, WebhookVerifier, crypto};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(SourceRegistry::new());
//!     let verifier = WebhookVerifier::new(Arc::clone(&registry), HookworkConfig::default());
//!
//!     verifier
//!         .register_source(WebhookSource::new("Acme CI", "shared-secret").with_id("acme"))
//!         .await?;
//!
//!     // What a sender transmits: the exact signed bytes plus headers
//!     let now = hookwork::timestamp::now_ms();
//!     let body = format!(
//!         r#"{{"event":"push","timestamp":{},"delivery_id":"d-1","data":{{}}}}"#,
//!         now
//!     );
//!     let signature = crypto::sign("shared-secret", now, body.as_bytes())?;
//!
//!     let mut headers = HashMap::new();
//!     headers.insert("X-Hub-Signature-256".to_string(), format!("sha256={}", signature));
//!     headers.insert("X-Hub-Timestamp".to_string(), now.to_string());
//!     headers.insert("User-Agent".to_string(), "Acme CI agent/1.0".to_string());
//!     headers.insert("Content-Type".to_string(), "application/json".to_string());
//!
//!     let result = verifier.verify(body.as_bytes(), &headers, Some("acme")).await;
//!     assert!(result.valid);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Verification
//!
//! [`WebhookVerifier::verify`] takes the raw request body, its headers, and
//! an optional explicit source id, and always returns a
//! [`VerificationResult`] - failures surface as stable error codes, never as
//! `Err` or a panic. Verification proceeds in phases (headers, source and
//! rate limit, signature, payload and replay) and stops at the first failure,
//! so no HMAC is computed for requests that fail cheaper checks.
//!
//! ### Sources
//!
//! A [`WebhookSource`] holds one sender's shared secret, expected events, and
//! per-source overrides. The [`SourceRegistry`] resolves inbound requests by
//! explicit id or by User-Agent heuristics; disabled sources fail closed.
//!
//! ### Outbound delivery
//!
//! The [`DeliveryManager`] signs payloads the same way inbound verification
//! expects, attempts HTTP delivery through a pluggable transport, and retries
//! retryable failures on an exponential backoff schedule with jitter until
//! the attempt budget runs out. A background sweep drives due deliveries
//! under a concurrency cap.
//!
//! ### Housekeeping
//!
//! The [`Housekeeper`] periodically drops expired nonces and delivery-id
//! records, idle rate-limit state, stale pending deliveries, and terminal
//! deliveries past the retention window.

pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod headers;
pub mod housekeeping;
pub mod payload;
pub mod pipeline;
pub mod rate_limit;
pub mod replay;
pub mod retry;
pub mod signature;
pub mod source;
pub mod store;
pub mod timestamp;
pub mod transport;

pub use config::{
    DeliveryConfig, HookworkConfig, HousekeepingConfig, RateLimitingConfig, ReplayConfig,
    VerificationConfig,
};
pub use delivery::{
    AttemptOutcome, DeliveryManager, DeliveryStats, DeliveryStatus, WebhookDelivery,
};
pub use error::HookworkError;
pub use housekeeping::{Housekeeper, HousekeepingReport};
pub use payload::WebhookPayload;
pub use pipeline::{
    SourceRef, VerificationMetadata, VerificationPhase, VerificationResult, VerifierStats,
    WebhookVerifier,
};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimiter, TokenBucketLimiter};
pub use replay::{ReplayCheck, ReplayGuard};
pub use retry::RetryPolicy;
pub use signature::WebhookSignature;
pub use source::{SourceRegistry, WebhookSource};
pub use store::{ExpiringStore, InMemoryExpiringStore};
pub use transport::{DeliveryTransport, ReqwestTransport, TransportError, TransportResponse};

/// Convenient type alias for Results with [`HookworkError`] as the error type.
///
/// This is used throughout the crate for consistent error handling.
pub type Result<T> = std::result::Result<T, HookworkError>;
