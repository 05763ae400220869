//! Durable cache tier.
//!
//! Wraps any [`DocumentStore`]. Every failure here is logged and swallowed; if the
//! store cannot be opened at all the tier runs in no-op mode for the process lifetime.
//!
//! Document keys are sanitized and may collide, so each document records the cache
//! key it was written for. A document read back under a different key is a miss.

use super::{CacheEntry, ResourceClass, TtlPolicy};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::DocumentDb;
use std::path::Path;
use tracing::{debug, info, warn};

/// Longest document key the store accepts
pub const MAX_KEY_BYTES: usize = 1500;

/// Key-value document storage
pub trait DocumentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, body: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    fn keys(&self) -> Result<Vec<String>>;
}

impl DocumentStore for DocumentDb {
    fn get(&self, key: &str) -> Result<Option<String>> {
        DocumentDb::get(self, key)
    }

    fn set(&self, key: &str, body: &str) -> Result<()> {
        DocumentDb::set(self, key, body)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        DocumentDb::delete(self, key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        DocumentDb::keys(self)
    }
}

/// On-disk document: `{key, data, cachedAt}`
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry<T>,
}

/// Map a cache key to a document key the store accepts
///
/// Path separators, reserved punctuation and whitespace become `_`; the result is
/// capped at [`MAX_KEY_BYTES`] on a char boundary.
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        let mapped = match c {
            '/' | '\\' | ':' | '?' | '#' | '*' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        };
        if out.len() + mapped.len_utf8() > MAX_KEY_BYTES {
            break;
        }
        out.push(mapped);
    }
    out
}

pub struct DurableTier {
    store: Option<Box<dyn DocumentStore>>,
}

impl DurableTier {
    /// Open the SQLite store at `path`, degrading to no-op on failure
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match DocumentDb::open(path) {
            Ok(db) => {
                info!(path = %path.display(), "Durable cache available");
                Self::with_store(Box::new(db))
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Durable cache unavailable, using volatile tier only"
                );
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn with_store(store: Box<dyn DocumentStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    /// Read an entry; unreadable or undecodable documents are misses
    pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let store = self.store.as_ref()?;
        let doc_key = sanitize_key(key);

        let body = match store.get(&doc_key) {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = key, error = %e, "Durable cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<StoredEntry<T>>(&body) {
            Ok(stored) if stored.key == key => Some(stored.entry),
            Ok(stored) => {
                debug!(
                    key = key,
                    stored_key = %stored.key,
                    "Durable document belongs to another key"
                );
                None
            }
            Err(e) => {
                debug!(key = key, error = %e, "Discarding undecodable durable entry");
                None
            }
        }
    }

    pub fn set_entry<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let stored = StoredEntry {
            key: key.to_string(),
            entry: CacheEntry::new(&entry.payload, entry.cached_at),
        };
        let body = match serde_json::to_string(&stored) {
            Ok(body) => body,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = store.set(&sanitize_key(key), &body) {
            warn!(key = key, error = %e, "Durable cache write failed");
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.delete(&sanitize_key(key)) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(key = key, error = %e, "Durable cache delete failed");
                false
            }
        }
    }

    /// Delete every expired or unreadable document; returns how many were removed
    pub fn prune(&self, policy: &TtlPolicy, now: DateTime<Utc>) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };

        let doc_keys = match store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Durable cache listing failed");
                return 0;
            }
        };

        let mut removed = 0;
        for doc_key in doc_keys {
            let body = match store.get(&doc_key) {
                Ok(Some(body)) => body,
                Ok(None) => continue,
                Err(e) => {
                    warn!(doc_key = %doc_key, error = %e, "Durable cache read failed");
                    continue;
                }
            };

            if is_fresh_document(&body, policy, now) {
                continue;
            }
            match store.delete(&doc_key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(doc_key = %doc_key, error = %e, "Durable cache delete failed"),
            }
        }

        debug!(removed = removed, "Pruned durable cache");
        removed
    }
}

fn is_fresh_document(body: &str, policy: &TtlPolicy, now: DateTime<Utc>) -> bool {
    let Ok(stored) = serde_json::from_str::<StoredEntry<Value>>(body) else {
        return false;
    };
    ResourceClass::from_key(&stored.key)
        .map_or(false, |class| stored.entry.is_fresh(policy.ttl(class), now))
}
