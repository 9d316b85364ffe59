//! Expiring key stores.
//!
//! Replay protection (nonces, delivery ids) needs a shared set with TTL
//! semantics and an atomic claim operation. The [`ExpiringStore`] trait keeps
//! that pluggable: the bundled [`InMemoryExpiringStore`] covers single-process
//! deployments, while multi-instance deployments can back the same trait with
//! a shared cache so replay protection holds across processes.

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A concurrency-safe key set with per-entry TTLs.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Record `key` with `ttl` if it is not already present.
    ///
    /// Returns `true` when this call recorded the key. The check and the
    /// record are a single atomic step: of any number of concurrent calls
    /// with the same key, exactly one observes `true`.
    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Whether `key` is currently recorded and unexpired.
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Forget `key` if present.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Number of entries currently held, including expired entries that have
    /// not been purged yet.
    async fn len(&self) -> Result<usize>;
}

/// In-memory [`ExpiringStore`] with a hard capacity bound.
///
/// When an insert finds the store full it first drops expired entries, then
/// evicts the entries closest to expiry until there is room. Entries are
/// initialized empty at startup and live only for the process lifetime.
pub struct InMemoryExpiringStore {
    entries: Mutex<HashMap<String, Instant>>,
    capacity: usize,
}

impl InMemoryExpiringStore {
    /// Unbounded store (callers that need a bound use [`with_capacity`]).
    ///
    /// [`with_capacity`]: InMemoryExpiringStore::with_capacity
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Store holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryExpiringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryExpiringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExpiringStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExpiringStore for InMemoryExpiringStore {
    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        // An expired entry counts as absent and may be replaced
        if let Some(expiry) = entries.get(key) {
            if *expiry > now {
                return Ok(false);
            }
        }

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.retain(|_, expiry| *expiry > now);
            while entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, expiry)| **expiry)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }

        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .is_some_and(|expiry| *expiry > Instant::now()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize> {
        let entries = self.entries.lock().await;
        Ok(entries.len())
    }
}
