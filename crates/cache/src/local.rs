//! In-process charge ledger backed by DashMap.
//! Entries live for a bounded TTL; expired ones are evicted on access and by
//! periodic maintenance.

use crate::ledger::ChargeLedger;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_core::RelayResult;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lock-free seen-charge set for single-instance deployments.
pub struct LocalChargeLedger {
    store: DashMap<String, Instant>,
    ttl: Duration,
}

impl LocalChargeLedger {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            store: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Claim `key` at `now`. The entry API holds the shard lock, so two
    /// concurrent claims for one key cannot both win.
    pub fn claim_at(&self, key: &str, now: Instant) -> bool {
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) > self.ttl {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, inserted_at| inserted_at.elapsed() <= self.ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl ChargeLedger for LocalChargeLedger {
    async fn claim(&self, key: &str) -> RelayResult<bool> {
        let claimed = self.claim_at(key, Instant::now());
        if !claimed {
            metrics::counter!("ledger.duplicate").increment(1);
        }
        Ok(claimed)
    }

    async fn release(&self, key: &str) -> RelayResult<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn maintenance(&self) {
        let evicted = self.evict_expired();
        if evicted > 0 {
            debug!(evicted = evicted, "Charge ledger eviction complete");
        }
    }
}
