//! Volatile in-process cache tier.
//!
//! Expired entries are evicted lazily when read; [`MemoryCache::prune`] sweeps
//! everything on demand.

use super::{CacheEntry, ResourceClass, TtlPolicy};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    class: ResourceClass,
    entry: CacheEntry<Value>,
}

/// Thread-safe map from full cache key to entry
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh entry for `key`, evicting it if it has expired
    pub fn get(
        &self,
        key: &str,
        policy: &TtlPolicy,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<Value>> {
        {
            let slots = self.slots.read().ok()?;
            let slot = slots.get(key)?;
            if slot.entry.is_fresh(policy.ttl(slot.class), now) {
                return Some(slot.entry.clone());
            }
        }

        self.evict_if_stale(key, policy, now);
        None
    }

    /// Remove `key` only if the entry stored right now is expired
    ///
    /// The read lock is released before eviction, so a writer may have replaced
    /// the stale entry in between.
    fn evict_if_stale(&self, key: &str, policy: &TtlPolicy, now: DateTime<Utc>) -> bool {
        let Ok(mut slots) = self.slots.write() else {
            return false;
        };
        let stale = slots
            .get(key)
            .map_or(false, |slot| !slot.entry.is_fresh(policy.ttl(slot.class), now));
        if stale {
            slots.remove(key);
            debug!(key = key, "Evicted expired volatile entry");
        }
        stale
    }

    pub fn insert(&self, key: String, class: ResourceClass, entry: CacheEntry<Value>) {
        if let Ok(mut slots) = self.slots.write() {
            slots.insert(key, Slot { class, entry });
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.slots
            .write()
            .map(|mut slots| slots.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every expired entry; returns how many were removed
    pub fn prune(&self, policy: &TtlPolicy, now: DateTime<Utc>) -> usize {
        let Ok(mut slots) = self.slots.write() else {
            return 0;
        };
        let before = slots.len();
        slots.retain(|_, slot| slot.entry.is_fresh(policy.ttl(slot.class), now));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn policy() -> TtlPolicy {
        TtlPolicy {
            search: Duration::from_secs(60),
            episodes: Duration::from_secs(3600),
            streams: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_hit_and_lazy_eviction() {
        let cache = MemoryCache::new();
        let written = Utc::now();
        cache.insert(
            "search:frieren".to_string(),
            ResourceClass::Search,
            CacheEntry::new(json!(["a"]), written),
        );

        let hit = cache.get("search:frieren", &policy(), written + chrono::Duration::seconds(59));
        assert_eq!(hit.map(|e| e.payload), Some(json!(["a"])));
        assert_eq!(cache.len(), 1);

        let miss = cache.get("search:frieren", &policy(), written + chrono::Duration::seconds(61));
        assert!(miss.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_spares_rewritten_entry() {
        let cache = MemoryCache::new();
        let written = Utc::now();
        let now = written + chrono::Duration::seconds(61);
        cache.insert(
            "search:frieren".to_string(),
            ResourceClass::Search,
            CacheEntry::new(json!(["old"]), written),
        );

        // A writer refreshes the key after a reader saw the stale entry
        cache.insert(
            "search:frieren".to_string(),
            ResourceClass::Search,
            CacheEntry::new(json!(["new"]), now),
        );
        assert!(!cache.evict_if_stale("search:frieren", &policy(), now));

        let hit = cache.get("search:frieren", &policy(), now);
        assert_eq!(hit.map(|e| e.payload), Some(json!(["new"])));
    }

    #[test]
    fn test_prune_uses_class_ttl() {
        let cache = MemoryCache::new();
        let written = Utc::now();
        let entry = |n: i32| CacheEntry::new(json!(n), written);
        cache.insert("search:a".into(), ResourceClass::Search, entry(1));
        cache.insert("streams:b".into(), ResourceClass::Streams, entry(2));
        cache.insert("episodes:c".into(), ResourceClass::Episodes, entry(3));

        // 15 minutes later: search and streams have expired, episodes has not
        let removed = cache.prune(&policy(), written + chrono::Duration::minutes(15));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("episodes:c", &policy(), written).is_some());
    }

    #[test]
    fn test_remove() {
        let cache = MemoryCache::new();
        cache.insert(
            "streams:x".into(),
            ResourceClass::Streams,
            CacheEntry::new(json!(null), Utc::now()),
        );
        assert!(cache.remove("streams:x"));
        assert!(!cache.remove("streams:x"));
    }
}
