//! Periodic maintenance of verification and delivery state.
//!
//! The [`Housekeeper`] sweeps expired nonces and delivery-id records, stale
//! rate-limit buckets, pending deliveries past their activity window, and
//! terminal deliveries past the retention window. Each sweep holds any one
//! lock only for the duration of a bounded scan and removes only entries
//! that have actually expired.

use crate::config::HousekeepingConfig;
use crate::delivery::DeliveryManager;
use crate::rate_limit::RateLimiter;
use crate::replay::ReplayGuard;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What one housekeeping pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub nonces_removed: usize,
    pub delivery_ids_removed: usize,
    pub rate_limit_records_removed: usize,
    pub deliveries_expired: usize,
    pub deliveries_evicted: usize,
}

impl HousekeepingReport {
    /// Whether the pass removed anything at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Background maintenance over the engine's bounded state.
pub struct Housekeeper {
    replay: Arc<ReplayGuard>,
    rate_limiter: Arc<dyn RateLimiter>,
    deliveries: Option<Arc<DeliveryManager>>,
    config: HousekeepingConfig,
}

impl Housekeeper {
    /// Housekeeper over verification state only.
    pub fn new(
        replay: Arc<ReplayGuard>,
        rate_limiter: Arc<dyn RateLimiter>,
        config: HousekeepingConfig,
    ) -> Self {
        Self {
            replay,
            rate_limiter,
            deliveries: None,
            config,
        }
    }

    /// Also sweep outbound delivery records.
    pub fn with_deliveries(mut self, manager: Arc<DeliveryManager>) -> Self {
        self.deliveries = Some(manager);
        self
    }

    /// Run one maintenance pass.
    pub async fn run_once(&self) -> Result<HousekeepingReport> {
        let mut report = HousekeepingReport::default();

        let purge = self.replay.purge_expired().await?;
        report.nonces_removed = purge.nonces_removed;
        report.delivery_ids_removed = purge.delivery_ids_removed;

        report.rate_limit_records_removed = self.rate_limiter.purge_expired().await?;

        if let Some(manager) = &self.deliveries {
            report.deliveries_expired = manager.expire_stale(self.config.pending_ttl).await;
            report.deliveries_evicted = manager.evict_terminal(self.config.terminal_retention).await;
        }

        if !report.is_empty() {
            tracing::debug!(
                nonces_removed = report.nonces_removed,
                delivery_ids_removed = report.delivery_ids_removed,
                rate_limit_records_removed = report.rate_limit_records_removed,
                deliveries_expired = report.deliveries_expired,
                deliveries_evicted = report.deliveries_evicted,
                "housekeeping pass complete"
            );
        }

        Ok(report)
    }

    /// Sweep on the configured interval until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        tracing::info!(interval = ?self.config.interval, "housekeeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "housekeeping pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("housekeeper shutting down");
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for Housekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Housekeeper")
            .field("config", &self.config)
            .field("sweeps_deliveries", &self.deliveries.is_some())
            .finish_non_exhaustive()
    }
}
