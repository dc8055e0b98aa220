//! Cache storage trait and shared types.

use crate::error::Result;
use crate::http::{CacheKey, GatewayResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds applied to a store after writes.
///
/// The default is unbounded: entries live until their store is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Keep at most this many entries (least recently accessed go first).
    pub max_entries: Option<usize>,
    /// Keep the store's body bytes at or under this total.
    pub max_bytes: Option<u64>,
    /// Drop entries cached longer ago than this many seconds.
    pub max_age_secs: Option<u64>,
}

impl EvictionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.max_bytes.is_none() && self.max_age_secs.is_none()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub key: CacheKey,
    pub response: GatewayResponse,
    /// When the fetch that produced this response started.
    pub fetched_at: DateTime<Utc>,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// When the entry was last returned by a lookup.
    pub last_accessed: DateTime<Utc>,
}

/// How `put` treats an existing entry under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Last writer wins.
    Overwrite,
    /// Skip the write when the stored entry came from a later fetch.
    IfNewer,
}

/// Statistics for one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub name: String,
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Statistics across every store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub store_count: usize,
    pub stores: Vec<StoreStats>,
}

impl CacheStats {
    pub fn from_stores(stores: Vec<StoreStats>) -> Self {
        Self {
            total_entries: stores.iter().map(|s| s.entry_count).sum(),
            total_size_bytes: stores.iter().map(|s| s.total_size_bytes).sum(),
            store_count: stores.len(),
            stores,
        }
    }

    pub fn store(&self, name: &str) -> Option<&StoreStats> {
        self.stores.iter().find(|s| s.name == name)
    }
}

/// Named cache stores holding request/response pairs.
///
/// Each store keeps at most one entry per [`CacheKey`]. Operations are
/// synchronous to match rusqlite's API; implementations hold their locks only
/// for the duration of a call.
pub trait CacheStorage: Send + Sync {
    /// Create the store if it does not exist.
    fn open(&self, store: &str) -> Result<()>;

    fn has(&self, store: &str) -> Result<bool>;

    /// Store names in creation order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Delete a store and every entry in it. Returns whether it existed.
    fn delete(&self, store: &str) -> Result<bool>;

    /// Look up an entry, refreshing its access time.
    ///
    /// A missing store is a miss, not an error.
    fn lookup(&self, store: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

    /// Write an entry, creating the store if needed.
    ///
    /// Returns `false` when `WriteMode::IfNewer` skipped the write.
    fn put(
        &self,
        store: &str,
        key: &CacheKey,
        response: &GatewayResponse,
        fetched_at: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<bool>;

    /// Write every entry or none of them.
    fn put_all(
        &self,
        store: &str,
        entries: &[(CacheKey, GatewayResponse)],
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;

    fn entry_keys(&self, store: &str) -> Result<Vec<CacheKey>>;

    fn stats(&self) -> Result<CacheStats>;

    /// Apply an eviction policy to one store. Returns the number of entries removed.
    fn evict(&self, store: &str, policy: &EvictionPolicy) -> Result<usize>;

    /// Look up a key across several stores, returning the first hit.
    fn lookup_any(&self, stores: &[String], key: &CacheKey) -> Result<Option<CachedEntry>> {
        for store in stores {
            if let Some(entry) = self.lookup(store, key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// The parts of an entry eviction decisions depend on.
#[derive(Debug, Clone)]
pub(crate) struct EntryFootprint {
    pub key: CacheKey,
    pub cached_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Choose which entries a policy removes.
///
/// Expired entries go first, then least recently accessed entries until both
/// the entry and byte bounds hold.
pub(crate) fn select_victims(
    mut entries: Vec<EntryFootprint>,
    policy: &EvictionPolicy,
    now: DateTime<Utc>,
) -> Vec<CacheKey> {
    let mut victims = Vec::new();

    if let Some(max_age) = policy.max_age() {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        entries.retain(|e| {
            let expired = now.signed_duration_since(e.cached_at) > max_age;
            if expired {
                victims.push(e.key.clone());
            }
            !expired
        });
    }

    entries.sort_by_key(|e| e.last_accessed);

    let mut count = entries.len();
    let mut bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
    for entry in entries {
        let over_count = policy.max_entries.is_some_and(|max| count > max);
        let over_bytes = policy.max_bytes.is_some_and(|max| bytes > max);
        if !over_count && !over_bytes {
            break;
        }
        count -= 1;
        bytes -= entry.size_bytes;
        victims.push(entry.key);
    }

    victims
}
