//! Read-through, write-through composition of the volatile and durable tiers.

use super::{CacheEntry, DurableTier, MemoryCache, ResourceClass, TtlPolicy};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub volatile_entries: usize,
    pub durable_available: bool,
}

/// Entries removed by one sweep, per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub volatile: usize,
    pub durable: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.volatile + self.durable
    }
}

pub struct TieredCache {
    memory: MemoryCache,
    durable: DurableTier,
    policy: TtlPolicy,
}

impl TieredCache {
    pub fn new(durable: DurableTier, policy: TtlPolicy) -> Self {
        Self {
            memory: MemoryCache::new(),
            durable,
            policy,
        }
    }

    /// Volatile tier only
    pub fn volatile(policy: TtlPolicy) -> Self {
        Self::new(DurableTier::disabled(), policy)
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn get<T: DeserializeOwned>(&self, class: ResourceClass, key: &str) -> Option<T> {
        self.get_at(class, key, Utc::now())
    }

    /// Look up `key` as of `now`
    ///
    /// A fresh durable hit repopulates the volatile tier with its original write
    /// time, so it expires there no later than it would have durably.
    pub fn get_at<T: DeserializeOwned>(
        &self,
        class: ResourceClass,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<T> {
        let full_key = class.key(key);

        if let Some(entry) = self.memory.get(&full_key, &self.policy, now) {
            match serde_json::from_value(entry.payload) {
                Ok(payload) => {
                    debug!(key = %full_key, "Volatile cache hit");
                    return Some(payload);
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Discarding mistyped volatile entry");
                    self.memory.remove(&full_key);
                }
            }
        }

        let entry: CacheEntry<Value> = self.durable.get_entry(&full_key)?;
        if !entry.is_fresh(self.policy.ttl(class), now) {
            debug!(key = %full_key, "Durable entry expired");
            return None;
        }

        let payload = serde_json::from_value(entry.payload.clone()).ok()?;
        debug!(key = %full_key, "Durable cache hit");
        self.memory.insert(full_key, class, entry);
        Some(payload)
    }

    pub fn set<T: Serialize>(&self, class: ResourceClass, key: &str, value: &T) {
        self.set_at(class, key, value, Utc::now());
    }

    /// Store `value` in both tiers, stamped with `now`
    pub fn set_at<T: Serialize>(
        &self,
        class: ResourceClass,
        key: &str,
        value: &T,
        now: DateTime<Utc>,
    ) {
        let full_key = class.key(key);
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to encode cache value");
                return;
            }
        };

        let entry = CacheEntry::new(payload, now);
        self.durable.set_entry(&full_key, &entry);
        self.memory.insert(full_key, class, entry);
    }

    /// Remove `key` from both tiers
    pub fn invalidate(&self, class: ResourceClass, key: &str) {
        let full_key = class.key(key);
        self.memory.remove(&full_key);
        self.durable.delete(&full_key);
    }

    /// Sweep expired entries from both tiers
    pub fn prune(&self) -> PruneReport {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> PruneReport {
        PruneReport {
            volatile: self.memory.prune(&self.policy, now),
            durable: self.durable.prune(&self.policy, now),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            volatile_entries: self.memory.len(),
            durable_available: self.durable.is_available(),
        }
    }
}
