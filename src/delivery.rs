//! Outbound webhook delivery with retries.
//!
//! The [`DeliveryManager`] owns the outbound half of the engine: it signs
//! payloads for registered sources, tracks each [`WebhookDelivery`] through
//! its lifecycle, and drives attempts with bounded concurrency and capped
//! exponential backoff. Outbound requests carry the same `X-Hub-*` headers
//! the inbound verifier checks, so a hookwork receiver can verify a hookwork
//! sender end to end.
//!
//! Delivery lifecycle:
//!
//! ```text
//! Pending --> Delivered          (2xx response)
//! Pending --> Pending            (retryable failure, attempts remaining)
//! Pending --> Failed             (terminal 4xx, or attempts exhausted)
//! Pending --> Expired            (housekeeping: stale past the pending TTL)
//! ```
//!
//! Delivered, Failed and Expired are terminal and never mutate again.

use crate::config::DeliveryConfig;
use crate::crypto;
use crate::error::HookworkError;
use crate::headers;
use crate::payload::WebhookPayload;
use crate::retry::{RetryPolicy, retryable_status};
use crate::source::SourceRegistry;
use crate::timestamp;
use crate::transport::DeliveryTransport;
use crate::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;
use tokio::sync::{RwLock, Semaphore, mpsc};
use uuid::Uuid;

/// Lifecycle state of an outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first or next attempt
    Pending,
    /// The receiver acknowledged with a 2xx response
    Delivered,
    /// Terminally failed: non-retryable response or attempts exhausted
    Failed,
    /// Abandoned by housekeeping after sitting pending too long
    Expired,
}

impl DeliveryStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Expired
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Expired => write!(f, "expired"),
        }
    }
}

/// One outbound webhook delivery and its attempt history.
///
/// `raw_payload` holds the exact bytes that were signed; re-serializing the
/// envelope could change key order and break the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Unique identifier of this delivery record
    pub id: Uuid,
    /// Source this delivery belongs to
    pub source_id: String,
    /// Event name carried in the `X-Hub-Event` header
    pub event: String,
    /// Envelope delivery id carried in the `X-Hub-Delivery` header
    pub payload_delivery_id: String,
    /// Endpoint the payload is posted to
    pub url: String,
    /// Serialized envelope, exactly as signed
    pub raw_payload: String,
    /// Hex HMAC-SHA256 over `"{timestamp_ms}.{raw_payload}"`
    pub signature: String,
    /// Timestamp the signature covers, epoch milliseconds
    pub timestamp_ms: i64,
    /// Retry policy snapshotted from the source at creation
    pub retry_policy: RetryPolicy,
    /// Current lifecycle state
    pub status: DeliveryStatus,
    /// Number of attempts made so far
    pub attempts: u32,
    /// When this delivery was created
    pub created_at: DateTime<Utc>,
    /// When the next attempt is due; `None` while in flight or terminal
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the last attempt ran
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the receiver acknowledged
    pub delivered_at: Option<DateTime<Utc>>,
    /// Status code of the most recent response, if any was received
    pub response_code: Option<u16>,
    /// Error from the most recent failed attempt
    pub error_message: Option<String>,
}

impl WebhookDelivery {
    /// Whether this delivery is due for an attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Pending
            && self.next_attempt_at.is_some_and(|due| due <= now)
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.last_attempt_at.unwrap_or(self.created_at)
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    /// The receiver acknowledged with a 2xx response
    pub success: bool,
    /// A further attempt has been scheduled
    pub should_retry: bool,
    /// What went wrong, when anything did
    pub error: Option<String>,
}

/// Point-in-time snapshot of delivery activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub created: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub expired: u64,
    pub retries_scheduled: u64,
    /// Mean round-trip of attempts that got an HTTP response, in ms
    pub avg_response_time_ms: f64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    created: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    retries_scheduled: AtomicU64,
    response_time_total_ms: AtomicU64,
    responses_measured: AtomicU64,
}

/// Manages signing, scheduling and sending of outbound deliveries.
pub struct DeliveryManager {
    registry: Arc<SourceRegistry>,
    transport: Arc<dyn DeliveryTransport>,
    deliveries: RwLock<HashMap<Uuid, WebhookDelivery>>,
    attempt_semaphore: Semaphore,
    counters: DeliveryCounters,
    config: DeliveryConfig,
}

impl DeliveryManager {
    /// Create a manager sending through `transport`.
    pub fn new(
        registry: Arc<SourceRegistry>,
        transport: Arc<dyn DeliveryTransport>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            deliveries: RwLock::new(HashMap::new()),
            attempt_semaphore: Semaphore::new(config.max_concurrent_deliveries.max(1)),
            counters: DeliveryCounters::default(),
            config,
        }
    }

    /// Sign `payload` for `source_id` and enqueue it for delivery.
    ///
    /// The signature covers `"{timestamp_ms}.{raw_payload}"` with the
    /// source's secret, where `timestamp_ms` is taken at creation. The
    /// delivery is due immediately; [`process_pending`](Self::process_pending)
    /// or the sweep loop picks it up.
    pub async fn create_delivery(
        &self,
        source_id: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookDelivery> {
        let source =
            self.registry
                .get(source_id)
                .await
                .ok_or_else(|| HookworkError::SourceNotFound {
                    id: source_id.to_string(),
                })?;
        if !source.is_active {
            return Err(HookworkError::Source {
                message: format!("source {} is disabled", source.id),
            });
        }
        let url = source.url.clone().ok_or_else(|| HookworkError::Delivery {
            message: format!("source {} has no delivery url", source.id),
        })?;

        let raw_payload = serde_json::to_string(payload)?;
        let timestamp_ms = timestamp::now_ms();
        let signature = crypto::sign(&source.secret, timestamp_ms, raw_payload.as_bytes())
            .map_err(|err| HookworkError::Signature {
                message: err.to_string(),
            })?;

        let now = Utc::now();
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            source_id: source.id.clone(),
            event: payload.event.clone(),
            payload_delivery_id: payload.delivery_id.clone(),
            url,
            raw_payload,
            signature,
            timestamp_ms,
            retry_policy: source.retry_policy.unwrap_or(self.config.retry),
            status: DeliveryStatus::Pending,
            attempts: 0,
            created_at: now,
            next_attempt_at: Some(now),
            last_attempt_at: None,
            delivered_at: None,
            response_code: None,
            error_message: None,
        };

        let mut deliveries = self.deliveries.write().await;
        deliveries.insert(delivery.id, delivery.clone());
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        if self.config.log_deliveries {
            tracing::debug!(
                delivery_id = %delivery.id,
                source_id = %delivery.source_id,
                event = %delivery.event,
                "Created webhook delivery"
            );
        }

        Ok(delivery)
    }

    /// Run one delivery attempt.
    ///
    /// Terminal deliveries are left untouched. A retryable failure with
    /// attempts remaining reschedules the delivery with backoff; anything
    /// else terminal-fails it.
    pub async fn attempt_delivery(&self, delivery_id: Uuid) -> Result<AttemptOutcome> {
        // Claim the attempt under the write lock, then release it for the
        // duration of the HTTP call.
        let claimed = {
            let mut deliveries = self.deliveries.write().await;
            let delivery =
                deliveries
                    .get_mut(&delivery_id)
                    .ok_or_else(|| HookworkError::DeliveryNotFound {
                        id: delivery_id.to_string(),
                    })?;

            if delivery.status.is_terminal() {
                return Ok(AttemptOutcome {
                    success: delivery.status == DeliveryStatus::Delivered,
                    should_retry: false,
                    error: Some(format!("delivery is already {}", delivery.status)),
                });
            }

            delivery.attempts += 1;
            delivery.last_attempt_at = Some(Utc::now());
            delivery.next_attempt_at = None;
            delivery.clone()
        };

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);

        let request_headers = self.build_headers(&claimed);
        let (response, roundtrip) = {
            let _permit = self.attempt_semaphore.acquire().await.map_err(|_| {
                HookworkError::Delivery {
                    message: "delivery semaphore closed".to_string(),
                }
            })?;
            let attempt_started = std::time::Instant::now();
            let response = self
                .transport
                .deliver(
                    &claimed.url,
                    &claimed.raw_payload,
                    &request_headers,
                    StdDuration::from_secs(self.config.request_timeout_secs),
                )
                .await;
            (response, attempt_started.elapsed())
        };

        if response.is_ok() {
            self.counters
                .response_time_total_ms
                .fetch_add(roundtrip.as_millis() as u64, Ordering::Relaxed);
            self.counters.responses_measured.fetch_add(1, Ordering::Relaxed);
        }

        let (response_code, retryable, error) = match &response {
            Ok(resp) if resp.is_success() => (Some(resp.status_code), false, None),
            Ok(resp) => (
                Some(resp.status_code),
                retryable_status(resp.status_code),
                Some(format!("HTTP {}", resp.status_code)),
            ),
            Err(err) => (None, true, Some(err.to_string())),
        };
        let success = error.is_none();

        let mut deliveries = self.deliveries.write().await;
        let delivery =
            deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| HookworkError::DeliveryNotFound {
                    id: delivery_id.to_string(),
                })?;

        // Housekeeping may have expired the delivery while the request was
        // in flight; terminal states stay terminal.
        if delivery.status.is_terminal() {
            return Ok(AttemptOutcome {
                success: delivery.status == DeliveryStatus::Delivered,
                should_retry: false,
                error: Some(format!("delivery is already {}", delivery.status)),
            });
        }

        delivery.response_code = response_code;

        if success {
            delivery.status = DeliveryStatus::Delivered;
            delivery.delivered_at = Some(Utc::now());
            delivery.error_message = None;
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);

            if self.config.log_deliveries {
                tracing::debug!(
                    delivery_id = %delivery.id,
                    source_id = %delivery.source_id,
                    attempt = delivery.attempts,
                    "Webhook delivery succeeded"
                );
            }
            return Ok(AttemptOutcome {
                success: true,
                should_retry: false,
                error: None,
            });
        }

        delivery.error_message = error.clone();

        let should_retry = retryable && delivery.retry_policy.has_attempts_remaining(delivery.attempts);
        if should_retry {
            let delay = delivery.retry_policy.delay_for_attempt(delivery.attempts);
            delivery.next_attempt_at = Utc::now().checked_add_signed(
                ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero()),
            );
            self.counters.retries_scheduled.fetch_add(1, Ordering::Relaxed);

            if self.config.log_deliveries {
                tracing::warn!(
                    delivery_id = %delivery.id,
                    source_id = %delivery.source_id,
                    attempt = delivery.attempts,
                    max_attempts = delivery.retry_policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Webhook delivery failed, retry scheduled"
                );
            }
        } else {
            delivery.status = DeliveryStatus::Failed;
            self.counters.failed.fetch_add(1, Ordering::Relaxed);

            if self.config.log_deliveries {
                tracing::error!(
                    delivery_id = %delivery.id,
                    source_id = %delivery.source_id,
                    attempts = delivery.attempts,
                    error = %delivery.error_message.as_deref().unwrap_or("unknown"),
                    "Webhook delivery failed terminally"
                );
            }
        }

        Ok(AttemptOutcome {
            success: false,
            should_retry,
            error,
        })
    }

    /// Attempt every due pending delivery, returning how many were processed.
    ///
    /// Attempts run concurrently but the semaphore keeps at most
    /// `max_concurrent_deliveries` requests in flight.
    pub async fn process_pending(self: &Arc<Self>) -> Result<usize> {
        let now = Utc::now();
        let due: Vec<Uuid> = {
            let deliveries = self.deliveries.read().await;
            deliveries
                .values()
                .filter(|delivery| delivery.is_due(now))
                .map(|delivery| delivery.id)
                .collect()
        };

        if due.is_empty() {
            return Ok(0);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for delivery_id in due {
            let manager = Arc::clone(self);
            tasks.spawn(async move { manager.attempt_delivery(delivery_id).await });
        }

        let mut processed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => processed += 1,
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Delivery attempt failed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Delivery task panicked");
                }
            }
        }

        Ok(processed)
    }

    /// Sweep loop: processes due deliveries until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            "Delivery manager started"
        );
        let mut sweep = tokio::time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    if let Err(err) = self.process_pending().await {
                        tracing::error!(error = %err, "Delivery sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Delivery manager shutting down");
                    break;
                }
            }
        }
    }

    /// Look up a delivery by id.
    pub async fn get_delivery(&self, delivery_id: Uuid) -> Option<WebhookDelivery> {
        let deliveries = self.deliveries.read().await;
        deliveries.get(&delivery_id).cloned()
    }

    /// List deliveries, optionally filtered by status.
    pub async fn list_deliveries(&self, status: Option<DeliveryStatus>) -> Vec<WebhookDelivery> {
        let deliveries = self.deliveries.read().await;
        deliveries
            .values()
            .filter(|delivery| status.is_none_or(|s| delivery.status == s))
            .cloned()
            .collect()
    }

    /// Number of deliveries still pending.
    pub async fn pending_count(&self) -> usize {
        let deliveries = self.deliveries.read().await;
        deliveries
            .values()
            .filter(|delivery| delivery.status == DeliveryStatus::Pending)
            .count()
    }

    /// Expire pending deliveries with no activity for `pending_ttl`.
    ///
    /// Called by housekeeping. Returns how many were expired.
    pub async fn expire_stale(&self, pending_ttl: StdDuration) -> usize {
        let ttl = match ChronoDuration::from_std(pending_ttl) {
            Ok(ttl) => ttl,
            Err(_) => return 0,
        };
        let now = Utc::now();

        let mut deliveries = self.deliveries.write().await;
        let mut expired = 0;
        for delivery in deliveries.values_mut() {
            if delivery.status != DeliveryStatus::Pending {
                continue;
            }
            let stale = delivery
                .last_activity()
                .checked_add_signed(ttl)
                .is_some_and(|deadline| deadline < now);
            if stale {
                delivery.status = DeliveryStatus::Expired;
                delivery.next_attempt_at = None;
                expired += 1;
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    delivery_id = %delivery.id,
                    source_id = %delivery.source_id,
                    attempts = delivery.attempts,
                    "Expired stale pending delivery"
                );
            }
        }
        expired
    }

    /// Drop terminal deliveries older than `retention`.
    ///
    /// Called by housekeeping. Returns how many were evicted.
    pub async fn evict_terminal(&self, retention: StdDuration) -> usize {
        let retention = match ChronoDuration::from_std(retention) {
            Ok(retention) => retention,
            Err(_) => return 0,
        };
        let now = Utc::now();

        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|_, delivery| {
            if !delivery.status.is_terminal() {
                return true;
            }
            delivery
                .last_activity()
                .checked_add_signed(retention)
                .is_none_or(|deadline| deadline >= now)
        });
        before - deliveries.len()
    }

    /// Snapshot of delivery counters.
    pub async fn stats(&self) -> DeliveryStats {
        let measured = self.counters.responses_measured.load(Ordering::Relaxed);
        let avg_response_time_ms = if measured == 0 {
            0.0
        } else {
            self.counters.response_time_total_ms.load(Ordering::Relaxed) as f64 / measured as f64
        };
        DeliveryStats {
            created: self.counters.created.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            retries_scheduled: self.counters.retries_scheduled.load(Ordering::Relaxed),
            avg_response_time_ms,
            pending: self.pending_count().await,
        }
    }

    fn build_headers(&self, delivery: &WebhookDelivery) -> HashMap<String, String> {
        let mut request_headers = HashMap::new();
        request_headers.insert("Content-Type".to_string(), "application/json".to_string());
        request_headers.insert("User-Agent".to_string(), self.config.user_agent.clone());
        request_headers.insert(
            headers::SIGNATURE.to_string(),
            format!("sha256={}", delivery.signature),
        );
        request_headers.insert(
            headers::TIMESTAMP.to_string(),
            delivery.timestamp_ms.to_string(),
        );
        request_headers.insert(headers::EVENT.to_string(), delivery.event.clone());
        request_headers.insert(
            headers::DELIVERY.to_string(),
            delivery.payload_delivery_id.clone(),
        );
        request_headers
    }
}

impl std::fmt::Debug for DeliveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::WebhookSource;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct RecordedRequest {
        url: String,
        body: String,
        headers: HashMap<String, String>,
    }

    /// Plays back a scripted sequence of responses; 200 once exhausted.
    struct ScriptedTransport {
        script: Mutex<VecDeque<std::result::Result<TransportResponse, TransportError>>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn statuses(statuses: &[u16]) -> Self {
            Self::new(
                statuses
                    .iter()
                    .map(|&status_code| {
                        Ok(TransportResponse {
                            status_code,
                            body: None,
                        })
                    })
                    .collect(),
            )
        }

        fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryTransport for ScriptedTransport {
        async fn deliver(
            &self,
            url: &str,
            body: &str,
            request_headers: &HashMap<String, String>,
            _request_timeout: StdDuration,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_string(),
                body: body.to_string(),
                headers: request_headers.clone(),
            });
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(
                TransportResponse {
                    status_code: 200,
                    body: None,
                },
            ))
        }
    }

    async fn manager_with(
        transport: Arc<ScriptedTransport>,
        config: DeliveryConfig,
    ) -> Arc<DeliveryManager> {
        let registry = Arc::new(SourceRegistry::new());
        registry
            .register(
                WebhookSource::new("acme", "delivery-secret")
                    .with_id("acme")
                    .with_url("https://hooks.example.com/acme"),
            )
            .await
            .unwrap();
        Arc::new(DeliveryManager::new(registry, transport, config))
    }

    fn zero_delay_config() -> DeliveryConfig {
        let mut config = DeliveryConfig::default();
        config.retry = RetryPolicy::default()
            .with_initial_delay_ms(0)
            .with_jitter_max_ms(0);
        config.log_deliveries = false;
        config
    }

    fn sample_payload() -> WebhookPayload {
        let data = json!({"ok": true}).as_object().cloned().unwrap_or_default();
        WebhookPayload::new("build.finished", data)
    }

    #[tokio::test]
    async fn test_create_delivery_signs_payload() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert!(delivery.next_attempt_at.is_some());

        // The signature verifies against the stored raw payload
        crypto::verify(
            "delivery-secret",
            delivery.timestamp_ms,
            delivery.raw_payload.as_bytes(),
            "sha256",
            &delivery.signature,
            1024 * 1024,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_delivery_unknown_source() {
        let transport = Arc::new(ScriptedTransport::statuses(&[]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let result = manager.create_delivery("ghost", &sample_payload()).await;
        assert!(matches!(
            result,
            Err(HookworkError::SourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_delivery_requires_url_and_active_source() {
        let transport = Arc::new(ScriptedTransport::statuses(&[]));
        let registry = Arc::new(SourceRegistry::new());
        registry
            .register(WebhookSource::new("no-url", "secret").with_id("no-url"))
            .await
            .unwrap();
        registry
            .register(
                WebhookSource::new("disabled", "secret")
                    .with_id("disabled")
                    .with_url("https://hooks.example.com/x")
                    .disabled(),
            )
            .await
            .unwrap();
        let manager = DeliveryManager::new(registry, transport, zero_delay_config());

        let result = manager.create_delivery("no-url", &sample_payload()).await;
        assert!(matches!(result, Err(HookworkError::Delivery { .. })));

        let result = manager.create_delivery("disabled", &sample_payload()).await;
        assert!(matches!(result, Err(HookworkError::Source { .. })));
    }

    #[tokio::test]
    async fn test_attempt_success_marks_delivered() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let manager = manager_with(transport.clone(), zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let outcome = manager.attempt_delivery(delivery.id).await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.should_retry);
        assert_eq!(outcome.error, None);

        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.response_code, Some(200));
        assert!(stored.delivered_at.is_some());
        assert!(stored.next_attempt_at.is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://hooks.example.com/acme");
        assert_eq!(requests[0].body, delivery.raw_payload);
    }

    #[tokio::test]
    async fn test_attempt_sends_verification_headers() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let manager = manager_with(transport.clone(), zero_delay_config()).await;

        let payload = sample_payload();
        let delivery = manager.create_delivery("acme", &payload).await.unwrap();
        manager.attempt_delivery(delivery.id).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(
            request.headers.get(headers::SIGNATURE),
            Some(&format!("sha256={}", delivery.signature))
        );
        assert_eq!(
            request.headers.get(headers::TIMESTAMP),
            Some(&delivery.timestamp_ms.to_string())
        );
        assert_eq!(
            request.headers.get(headers::EVENT),
            Some(&"build.finished".to_string())
        );
        assert_eq!(
            request.headers.get(headers::DELIVERY),
            Some(&payload.delivery_id)
        );
        assert_eq!(
            request.headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );
        assert!(request.headers.contains_key("User-Agent"));
    }

    #[tokio::test]
    async fn test_retryable_failure_schedules_backoff() {
        let transport = Arc::new(ScriptedTransport::statuses(&[503]));
        let mut config = zero_delay_config();
        config.retry = RetryPolicy::default().with_jitter_max_ms(0);
        let manager = manager_with(transport, config).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let outcome = manager.attempt_delivery(delivery.id).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.should_retry);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 503"));

        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.response_code, Some(503));
        // First retry backs off by initial_delay_ms
        assert!(stored.next_attempt_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_terminal_4xx_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::statuses(&[404]));
        let manager = manager_with(transport.clone(), zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let outcome = manager.attempt_delivery(delivery.id).await.unwrap();

        assert!(!outcome.success);
        assert!(!outcome.should_retry);

        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.error_message.as_deref(), Some("HTTP 404"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_retryable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(
            TransportError::Connection("refused".to_string()),
        )]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let outcome = manager.attempt_delivery(delivery.id).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.should_retry);
        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.response_code, None);
    }

    #[tokio::test]
    async fn test_attempts_exhaust_into_failed() {
        let transport = Arc::new(ScriptedTransport::statuses(&[503, 503, 503]));
        let mut config = zero_delay_config();
        config.retry = config.retry.with_max_attempts(3);
        let manager = manager_with(transport, config).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();

        for _ in 0..2 {
            let outcome = manager.attempt_delivery(delivery.id).await.unwrap();
            assert!(outcome.should_retry);
        }
        let last = manager.attempt_delivery(delivery.id).await.unwrap();
        assert!(!last.should_retry);

        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_delivery_is_immutable() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let manager = manager_with(transport.clone(), zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        manager.attempt_delivery(delivery.id).await.unwrap();

        let outcome = manager.attempt_delivery(delivery.id).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.should_retry);
        assert!(outcome.error.is_some());

        let stored = manager.get_delivery(delivery.id).await.unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_unknown_delivery() {
        let transport = Arc::new(ScriptedTransport::statuses(&[]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let result = manager.attempt_delivery(Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(HookworkError::DeliveryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_pending_attempts_only_due() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200, 200]));
        let manager = manager_with(transport.clone(), zero_delay_config()).await;

        let due = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let later = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        {
            let mut deliveries = manager.deliveries.write().await;
            deliveries.get_mut(&later.id).unwrap().next_attempt_at =
                Some(Utc::now() + ChronoDuration::hours(1));
        }

        let processed = manager.process_pending().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(
            manager.get_delivery(due.id).await.unwrap().status,
            DeliveryStatus::Delivered
        );
        assert_eq!(
            manager.get_delivery(later.id).await.unwrap().status,
            DeliveryStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_list_deliveries_filters_by_status() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200, 503]));
        let mut config = zero_delay_config();
        config.retry = config.retry.with_max_attempts(1);
        let manager = manager_with(transport, config).await;

        let delivered = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let failed = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        manager.attempt_delivery(delivered.id).await.unwrap();
        manager.attempt_delivery(failed.id).await.unwrap();
        let pending = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();

        assert_eq!(manager.list_deliveries(None).await.len(), 3);

        let only_pending = manager.list_deliveries(Some(DeliveryStatus::Pending)).await;
        assert_eq!(only_pending.len(), 1);
        assert_eq!(only_pending[0].id, pending.id);

        let only_failed = manager.list_deliveries(Some(DeliveryStatus::Failed)).await;
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, failed.id);
    }

    #[tokio::test]
    async fn test_expire_stale_and_evict_terminal() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let delivered = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        manager.attempt_delivery(delivered.id).await.unwrap();

        let stale = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        {
            let mut deliveries = manager.deliveries.write().await;
            deliveries.get_mut(&stale.id).unwrap().created_at =
                Utc::now() - ChronoDuration::hours(48);
        }

        let expired = manager.expire_stale(StdDuration::from_secs(24 * 3600)).await;
        assert_eq!(expired, 1);
        assert_eq!(
            manager.get_delivery(stale.id).await.unwrap().status,
            DeliveryStatus::Expired
        );

        // Neither terminal delivery is old enough to evict yet
        assert_eq!(manager.evict_terminal(StdDuration::from_secs(3600)).await, 0);

        // With zero retention both terminal deliveries are dropped
        let evicted = manager.evict_terminal(StdDuration::ZERO).await;
        assert_eq!(evicted, 2);
        assert!(manager.get_delivery(delivered.id).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200, 404]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let first = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        let second = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        manager.attempt_delivery(first.id).await.unwrap();
        manager.attempt_delivery(second.id).await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats.created, 2);
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_avg_response_time_ignores_transport_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(
            TransportError::Connection("refused".to_string()),
        )]));
        let manager = manager_with(transport, zero_delay_config()).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();
        manager.attempt_delivery(delivery.id).await.unwrap();

        // No HTTP response arrived, so nothing was measured
        let stats = manager.stats().await;
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.avg_response_time_ms, 0.0);
    }

    #[tokio::test]
    async fn test_run_loop_shuts_down() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let mut config = zero_delay_config();
        config.sweep_interval = StdDuration::from_millis(10);
        let manager = manager_with(transport, config).await;

        let delivery = manager
            .create_delivery("acme", &sample_payload())
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Arc::clone(&manager).run(shutdown_rx));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        assert_eq!(
            manager.get_delivery(delivery.id).await.unwrap().status,
            DeliveryStatus::Delivered
        );
    }
}
