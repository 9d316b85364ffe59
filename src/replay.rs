//! Replay protection.
//!
//! Two independent checks, both claims rather than reads: recording the
//! delivery id and the nonce is the same atomic step that detects reuse, so
//! two requests racing on one nonce produce exactly one winner.
//!
//! Nonces only need to outlive the timestamp tolerance window; the nonce
//! store is therefore bounded both in age and in entry count. Delivery-id
//! records live for the configured retention window.

use crate::Result;
use crate::config::ReplayConfig;
use crate::store::{ExpiringStore, InMemoryExpiringStore};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of claiming a delivery id and optional nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    /// Neither key was seen before; both are now recorded
    Clean,

    /// The delivery id was already recorded
    DuplicateDelivery,

    /// The nonce was already recorded
    NonceReused,
}

/// Dedupe sets for delivery ids and nonces.
pub struct ReplayGuard {
    nonces: Arc<dyn ExpiringStore>,
    delivery_ids: Arc<dyn ExpiringStore>,
    nonce_ttl: Duration,
    delivery_id_retention: Duration,
}

/// Entry counts removed by a purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayPurge {
    pub nonces_removed: usize,
    pub delivery_ids_removed: usize,
}

impl ReplayGuard {
    /// Guard backed by in-memory stores sized from `config`.
    pub fn new(config: &ReplayConfig) -> Self {
        Self::with_stores(
            Arc::new(InMemoryExpiringStore::with_capacity(config.nonce_capacity)),
            Arc::new(InMemoryExpiringStore::new()),
            config,
        )
    }

    /// Guard over caller-provided stores (e.g. a shared cache spanning
    /// process instances).
    pub fn with_stores(
        nonces: Arc<dyn ExpiringStore>,
        delivery_ids: Arc<dyn ExpiringStore>,
        config: &ReplayConfig,
    ) -> Self {
        Self {
            nonces,
            delivery_ids,
            nonce_ttl: config.nonce_ttl,
            delivery_id_retention: config.delivery_id_retention,
        }
    }

    /// Claim `delivery_id` and, when present, `nonce`.
    ///
    /// The delivery id is claimed first; a duplicate returns without touching
    /// the nonce, so a rejected request never consumes one.
    pub async fn claim(&self, delivery_id: &str, nonce: Option<&str>) -> Result<ReplayCheck> {
        if !self
            .delivery_ids
            .put_if_absent(delivery_id, self.delivery_id_retention)
            .await?
        {
            return Ok(ReplayCheck::DuplicateDelivery);
        }

        if let Some(nonce) = nonce {
            if !self.nonces.put_if_absent(nonce, self.nonce_ttl).await? {
                return Ok(ReplayCheck::NonceReused);
            }
        }

        Ok(ReplayCheck::Clean)
    }

    /// Drop expired records from both stores.
    pub async fn purge_expired(&self) -> Result<ReplayPurge> {
        Ok(ReplayPurge {
            nonces_removed: self.nonces.purge_expired().await?,
            delivery_ids_removed: self.delivery_ids.purge_expired().await?,
        })
    }

    /// Number of nonce records currently held.
    pub async fn nonce_count(&self) -> Result<usize> {
        self.nonces.len().await
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("nonce_ttl", &self.nonce_ttl)
            .field("delivery_id_retention", &self.delivery_id_retention)
            .finish_non_exhaustive()
    }
}
