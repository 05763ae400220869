//! Two-tier cache for scraped results.
//!
//! A volatile in-process tier absorbs repeats within a session; a durable document
//! tier survives restarts. Both tiers hold the same `{data, cachedAt}` envelope and
//! expiry is decided per resource class. Durable documents also carry their full
//! cache key.

pub mod durable;
pub mod memory;
pub mod tiered;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::config::CacheConfig;
use std::time::Duration;

pub use durable::{sanitize_key, DocumentStore, DurableTier};
pub use memory::MemoryCache;
pub use tiered::{CacheStats, PruneReport, TieredCache};

/// Kind of cached resource; decides the TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Search,
    Episodes,
    Streams,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::Search,
        ResourceClass::Episodes,
        ResourceClass::Streams,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Search => "search",
            ResourceClass::Episodes => "episodes",
            ResourceClass::Streams => "streams",
        }
    }

    /// Stable cache key: operation name followed by its arguments
    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key)
    }

    /// Class of a full cache key produced by [`ResourceClass::key`]
    pub fn from_key(full_key: &str) -> Option<Self> {
        let (prefix, _) = full_key.split_once(':')?;
        Self::ALL.into_iter().find(|class| class.as_str() == prefix)
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL per resource class
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub search: Duration,
    pub episodes: Duration,
    pub streams: Duration,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            search: Duration::from_secs(config.search_ttl_secs),
            episodes: Duration::from_secs(config.episodes_ttl_secs),
            streams: Duration::from_secs(config.streams_ttl_secs),
        }
    }

    pub fn ttl(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Search => self.search,
            ResourceClass::Episodes => self.episodes,
            ResourceClass::Streams => self.streams,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Cached payload with its wall-clock write time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    #[serde(rename = "data")]
    pub payload: T,
    #[serde(rename = "cachedAt")]
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, cached_at: DateTime<Utc>) -> Self {
        Self { payload, cached_at }
    }

    /// Valid iff `now - cached_at < ttl`
    ///
    /// Entries stamped in the future (clock skew between runs) count as fresh.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age < ttl,
            Err(_) => true,
        }
    }
}
