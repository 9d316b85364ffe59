//! Inbound verification pipeline.
//!
//! Verification walks a fixed phase order: header validation, source
//! authentication with rate limiting, cryptographic verification, then
//! payload validation and replay checks. The first failure ends the run and
//! the result still reports everything resolved up to that point. Replay
//! state is claimed only after the signature proves authentic, so a failed
//! request never consumes a nonce.
//!
//! [`WebhookVerifier::verify`] always returns a [`VerificationResult`];
//! failures surface as error codes, never as `Err` or a panic.

use crate::Result;
use crate::config::HookworkConfig;
use crate::crypto::{self, CryptoError};
use crate::error::HookworkError;
use crate::headers;
use crate::payload::{self, WebhookPayload};
use crate::rate_limit::{RateLimiter, TokenBucketLimiter};
use crate::replay::{ReplayCheck, ReplayGuard};
use crate::signature::{self, SignatureParseError};
use crate::source::{SourceRegistry, WebhookSource};
use crate::timestamp::{self, FreshnessError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Phase a verification run has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPhase {
    /// Request received, nothing validated yet
    Start,
    /// Required headers present, signature parsed, timestamp fresh
    HeadersValidated,
    /// Source resolved, active, and within its rate limit
    SourceAuthenticated,
    /// Signature proven authentic against the source secret
    CryptoVerified,
    /// Payload validated and replay state committed
    Finalized,
    /// Absorbing failure state, reachable from any phase
    Failed,
}

impl std::fmt::Display for VerificationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerificationPhase::Start => "start",
            VerificationPhase::HeadersValidated => "headers_validated",
            VerificationPhase::SourceAuthenticated => "source_authenticated",
            VerificationPhase::CryptoVerified => "crypto_verified",
            VerificationPhase::Finalized => "finalized",
            VerificationPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Identifying reference to a resolved source. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
}

impl From<&WebhookSource> for SourceRef {
    fn from(source: &WebhookSource) -> Self {
        Self {
            id: source.id.clone(),
            name: source.name.clone(),
        }
    }
}

/// Diagnostic detail attached to a [`VerificationResult`].
#[derive(Debug, Clone, Serialize)]
pub struct VerificationMetadata {
    /// Terminal phase: [`VerificationPhase::Finalized`] on success,
    /// [`VerificationPhase::Failed`] otherwise
    pub phase: VerificationPhase,

    /// Wall-clock time the verification took
    pub verification_time_ms: u64,

    /// Algorithm named by the signature header, once parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,

    /// Signed age of the authoritative timestamp (`now - timestamp`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_drift_ms: Option<i64>,

    /// Whether the request was rejected as a replay
    pub is_replay: bool,

    /// Human-oriented failure detail. Never includes the secret or the
    /// request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

/// Outcome of verifying one inbound delivery.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    /// Whether the delivery is authentic and fresh
    pub valid: bool,

    /// The resolved source, when resolution got that far
    pub source: Option<SourceRef>,

    /// The parsed payload, when parsing got that far
    pub payload: Option<WebhookPayload>,

    /// Stable error codes, first failure only
    pub errors: Vec<String>,

    /// Soft findings that do not fail verification
    pub warnings: Vec<String>,

    pub metadata: VerificationMetadata,
}

/// First failure observed by a pipeline run.
#[derive(Debug)]
enum VerificationFailure {
    MissingRequiredHeader(String),
    MissingSignatureHeader,
    InvalidSignatureHeader(String),
    TimestampTooOld,
    TimestampFuture,
    UnknownSource,
    SourceDisabled,
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
    },
    PayloadTooLarge {
        size: usize,
        cap: usize,
    },
    SignatureMismatch,
    SignatureVerificationError(String),
    InvalidPayload(String),
    DuplicateDelivery,
    NonceReused,
    Internal(String),
}

impl VerificationFailure {
    /// Stable code surfaced in [`VerificationResult::errors`].
    fn code(&self) -> &'static str {
        match self {
            VerificationFailure::MissingRequiredHeader(_) => "missing_required_header",
            VerificationFailure::MissingSignatureHeader => "missing_signature_header",
            VerificationFailure::InvalidSignatureHeader(_) => "invalid_signature_header",
            VerificationFailure::TimestampTooOld => "timestamp_too_old",
            VerificationFailure::TimestampFuture => "timestamp_future",
            VerificationFailure::UnknownSource => "unknown_source",
            VerificationFailure::SourceDisabled => "source_disabled",
            VerificationFailure::RateLimited { .. } => "rate_limited",
            VerificationFailure::PayloadTooLarge { .. } => "payload_too_large",
            VerificationFailure::SignatureMismatch => "signature_mismatch",
            VerificationFailure::SignatureVerificationError(_) => "signature_verification_error",
            VerificationFailure::InvalidPayload(_) => "invalid_payload",
            VerificationFailure::DuplicateDelivery => "duplicate_delivery",
            VerificationFailure::NonceReused => "nonce_reused",
            VerificationFailure::Internal(_) => "internal_error",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            VerificationFailure::MissingRequiredHeader(name) => {
                Some(format!("required header missing or empty: {}", name))
            }
            VerificationFailure::InvalidSignatureHeader(msg)
            | VerificationFailure::SignatureVerificationError(msg)
            | VerificationFailure::InvalidPayload(msg)
            | VerificationFailure::Internal(msg) => Some(msg.clone()),
            VerificationFailure::RateLimited { limit, reset_at } => Some(format!(
                "limit of {} exceeded; resets at {}",
                limit,
                reset_at.to_rfc3339()
            )),
            VerificationFailure::PayloadTooLarge { size, cap } => {
                Some(format!("payload is {} bytes, cap is {}", size, cap))
            }
            _ => None,
        }
    }

    fn is_replay(&self) -> bool {
        matches!(
            self,
            VerificationFailure::DuplicateDelivery | VerificationFailure::NonceReused
        )
    }
}

/// Dependency faults degrade to a rejection instead of crossing the
/// verification boundary as `Err`.
impl From<HookworkError> for VerificationFailure {
    fn from(err: HookworkError) -> Self {
        VerificationFailure::Internal(err.to_string())
    }
}

/// Context gathered as phases pass, reported even when a later phase fails.
#[derive(Default)]
struct PipelineContext {
    source: Option<SourceRef>,
    payload: Option<WebhookPayload>,
    warnings: Vec<String>,
    signature_algorithm: Option<String>,
    timestamp_drift_ms: Option<i64>,
    // Sender-claimed event and delivery id, for log correlation only
    event_hint: Option<String>,
    delivery_hint: Option<String>,
}

#[derive(Debug, Default)]
struct VerifierCounters {
    requests: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    hmac_computations: AtomicU64,
    rate_limited: AtomicU64,
    replays_blocked: AtomicU64,
}

/// Snapshot of verifier activity since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifierStats {
    pub requests: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// MACs actually computed; stays flat for requests rejected before the
    /// signature phase
    pub hmac_computations: u64,
    pub rate_limited: u64,
    pub replays_blocked: u64,
}

/// Orchestrates inbound webhook verification.
pub struct WebhookVerifier {
    registry: Arc<SourceRegistry>,
    rate_limiter: Arc<dyn RateLimiter>,
    replay: Arc<ReplayGuard>,
    config: HookworkConfig,
    counters: VerifierCounters,
}

impl WebhookVerifier {
    /// Verifier backed by the bundled token-bucket limiter and in-memory
    /// replay stores.
    pub fn new(registry: Arc<SourceRegistry>, config: HookworkConfig) -> Self {
        let rate_limiter = Arc::new(TokenBucketLimiter::new(
            config.rate_limiting.default_limit,
        ));
        let replay = Arc::new(ReplayGuard::new(&config.replay));
        Self::with_components(registry, rate_limiter, replay, config)
    }

    /// Verifier over caller-supplied rate limiting and replay state.
    pub fn with_components(
        registry: Arc<SourceRegistry>,
        rate_limiter: Arc<dyn RateLimiter>,
        replay: Arc<ReplayGuard>,
        config: HookworkConfig,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            replay,
            config,
            counters: VerifierCounters::default(),
        }
    }

    /// The registry sources are managed through.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// The replay guard, exposed for housekeeping.
    pub fn replay_guard(&self) -> &Arc<ReplayGuard> {
        &self.replay
    }

    /// The rate limiter, exposed for housekeeping.
    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    pub fn config(&self) -> &HookworkConfig {
        &self.config
    }

    /// Register a source and apply its rate-limit override when present.
    pub async fn register_source(&self, source: WebhookSource) -> Result<WebhookSource> {
        let registered = self.registry.register(source).await?;
        if let Some(limit) = registered.rate_limit {
            self.rate_limiter
                .set_source_limit(&registered.id, limit)
                .await;
        }
        Ok(registered)
    }

    /// Verify one inbound delivery.
    ///
    /// `raw_body` must be the exact bytes the sender signed; re-serialized
    /// JSON will not verify. Header names are matched case-insensitively.
    /// An explicit `source_id` overrides User-Agent resolution.
    pub async fn verify(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
        source_id: Option<&str>,
    ) -> VerificationResult {
        let started = Instant::now();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut ctx = PipelineContext::default();
        let outcome = self
            .run_pipeline(raw_body, headers, source_id, &mut ctx)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let source_label = ctx
            .source
            .as_ref()
            .map(|s| s.id.as_str())
            .unwrap_or("unknown");

        match outcome {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    source_id = %source_label,
                    event = ctx.event_hint.as_deref().unwrap_or(""),
                    delivery = ctx.delivery_hint.as_deref().unwrap_or(""),
                    duration_ms = elapsed_ms,
                    "webhook verified"
                );

                VerificationResult {
                    valid: true,
                    source: ctx.source,
                    payload: ctx.payload,
                    errors: Vec::new(),
                    warnings: ctx.warnings,
                    metadata: VerificationMetadata {
                        phase: VerificationPhase::Finalized,
                        verification_time_ms: elapsed_ms,
                        signature_algorithm: ctx.signature_algorithm,
                        timestamp_drift_ms: ctx.timestamp_drift_ms,
                        is_replay: false,
                        failure_detail: None,
                    },
                }
            }
            Err(failure) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                if failure.is_replay() {
                    self.counters.replays_blocked.fetch_add(1, Ordering::Relaxed);
                }
                if matches!(failure, VerificationFailure::RateLimited { .. }) {
                    self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                }
                tracing::warn!(
                    source_id = %source_label,
                    code = failure.code(),
                    event = ctx.event_hint.as_deref().unwrap_or(""),
                    delivery = ctx.delivery_hint.as_deref().unwrap_or(""),
                    duration_ms = elapsed_ms,
                    "webhook rejected"
                );

                VerificationResult {
                    valid: false,
                    source: ctx.source,
                    payload: ctx.payload,
                    errors: vec![failure.code().to_string()],
                    warnings: ctx.warnings,
                    metadata: VerificationMetadata {
                        phase: VerificationPhase::Failed,
                        verification_time_ms: elapsed_ms,
                        signature_algorithm: ctx.signature_algorithm,
                        timestamp_drift_ms: ctx.timestamp_drift_ms,
                        is_replay: failure.is_replay(),
                        failure_detail: failure.detail(),
                    },
                }
            }
        }
    }

    /// Walk the phase machine. The first failure aborts the run; everything
    /// resolved before it stays in `ctx`.
    async fn run_pipeline(
        &self,
        raw_body: &[u8],
        raw_headers: &HashMap<String, String>,
        source_id: Option<&str>,
        ctx: &mut PipelineContext,
    ) -> std::result::Result<(), VerificationFailure> {
        let cfg = &self.config.verification;

        // Start -> HeadersValidated
        let headers = headers::normalize(raw_headers);
        ctx.event_hint = headers::get(&headers, &cfg.event_header).map(str::to_string);
        ctx.delivery_hint = headers::get(&headers, &cfg.delivery_header).map(str::to_string);
        if let Some(name) = headers::missing_required(&headers, &cfg.required_headers) {
            return Err(VerificationFailure::MissingRequiredHeader(name));
        }

        let now = timestamp::now_ms();
        let signature_header = headers::get(&headers, &cfg.signature_header)
            .ok_or(VerificationFailure::MissingSignatureHeader)?;
        let signature = signature::parse(signature_header, now).map_err(|err| match err {
            SignatureParseError::Empty => VerificationFailure::MissingSignatureHeader,
            SignatureParseError::MissingParts => {
                VerificationFailure::InvalidSignatureHeader(err.to_string())
            }
        })?;
        ctx.signature_algorithm = Some(signature.algorithm.clone());

        let timestamp_ms = timestamp::resolve(
            headers::get(&headers, &cfg.timestamp_header),
            signature.timestamp,
        );
        let check = timestamp::validate(timestamp_ms, now, cfg.timestamp_tolerance).map_err(
            |err| match err {
                FreshnessError::TooOld => VerificationFailure::TimestampTooOld,
                FreshnessError::Future => VerificationFailure::TimestampFuture,
            },
        )?;
        ctx.timestamp_drift_ms = Some(check.drift_ms);
        if check.drift_warning {
            ctx.warnings.push("timestamp_drift".to_string());
        }

        // HeadersValidated -> SourceAuthenticated
        let source = self
            .registry
            .resolve(source_id, headers::get(&headers, "user-agent"))
            .await
            .ok_or(VerificationFailure::UnknownSource)?;
        ctx.source = Some(SourceRef::from(&source));
        if !source.is_active {
            return Err(VerificationFailure::SourceDisabled);
        }

        if self.config.rate_limiting.enabled {
            let origin = headers::client_origin(&headers);
            let key = self.config.rate_limiting.keying.key(&source.id, &origin);
            let decision = self.rate_limiter.check_and_consume(&key).await?;
            if !decision.allowed {
                return Err(VerificationFailure::RateLimited {
                    limit: decision.limit,
                    reset_at: decision.reset_at,
                });
            }
        }

        // SourceAuthenticated -> CryptoVerified. The size and algorithm
        // gates run before any MAC is computed.
        if raw_body.len() > cfg.max_payload_bytes {
            return Err(VerificationFailure::PayloadTooLarge {
                size: raw_body.len(),
                cap: cfg.max_payload_bytes,
            });
        }
        if signature.algorithm != crypto::SUPPORTED_ALGORITHM {
            return Err(VerificationFailure::SignatureVerificationError(format!(
                "unsupported signature algorithm: {}",
                signature.algorithm
            )));
        }

        self.counters
            .hmac_computations
            .fetch_add(1, Ordering::Relaxed);
        crypto::verify(
            &source.secret,
            timestamp_ms,
            raw_body,
            &signature.algorithm,
            &signature.signature,
            cfg.max_payload_bytes,
        )
        .map_err(|err| match err {
            CryptoError::Mismatch => VerificationFailure::SignatureMismatch,
            CryptoError::PayloadTooLarge => VerificationFailure::PayloadTooLarge {
                size: raw_body.len(),
                cap: cfg.max_payload_bytes,
            },
            CryptoError::UnsupportedAlgorithm(_) | CryptoError::Internal(_) => {
                VerificationFailure::SignatureVerificationError(err.to_string())
            }
        })?;

        // CryptoVerified -> Finalized. Replay state commits last, so a
        // failure above never consumed a nonce.
        let payload = payload::parse(raw_body)
            .map_err(|err| VerificationFailure::InvalidPayload(err.to_string()))?;
        if !source.accepts_event(&payload.event) {
            ctx.warnings.push("unexpected_event".to_string());
        }
        let delivery_id = payload.delivery_id.clone();
        let nonce = payload.nonce.clone();
        ctx.payload = Some(payload);

        match self.replay.claim(&delivery_id, nonce.as_deref()).await? {
            ReplayCheck::Clean => Ok(()),
            ReplayCheck::DuplicateDelivery => Err(VerificationFailure::DuplicateDelivery),
            ReplayCheck::NonceReused => Err(VerificationFailure::NonceReused),
        }
    }

    /// Snapshot the verifier counters.
    pub fn stats(&self) -> VerifierStats {
        VerifierStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            hmac_computations: self.counters.hmac_computations.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            replays_blocked: self.counters.replays_blocked.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
