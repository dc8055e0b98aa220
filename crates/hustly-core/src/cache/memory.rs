//! In-process cache storage.

use super::traits::{
    select_victims, CacheStats, CacheStorage, CachedEntry, EntryFootprint, EvictionPolicy,
    StoreStats, WriteMode,
};
use crate::error::{HustlyError, Result};
use crate::http::{CacheKey, GatewayResponse};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

struct MemoryStore {
    name: String,
    created_at: DateTime<Utc>,
    entries: HashMap<CacheKey, CachedEntry>,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: HashMap::new(),
        }
    }
}

/// Cache storage that lives only as long as the process.
///
/// Stores are kept in creation order so `keys()` matches the platform's
/// enumeration order.
#[derive(Default)]
pub struct MemoryCacheStorage {
    stores: Mutex<Vec<MemoryStore>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<MemoryStore>>> {
        self.stores
            .lock()
            .map_err(|e| HustlyError::Other(format!("Failed to lock memory cache: {}", e)))
    }

    fn store_mut<'a>(stores: &'a mut Vec<MemoryStore>, name: &str) -> &'a mut MemoryStore {
        match stores.iter().position(|s| s.name == name) {
            Some(idx) => &mut stores[idx],
            None => {
                stores.push(MemoryStore::new(name));
                let last = stores.len() - 1;
                &mut stores[last]
            }
        }
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open(&self, store: &str) -> Result<()> {
        let mut stores = self.lock()?;
        Self::store_mut(&mut stores, store);
        Ok(())
    }

    fn has(&self, store: &str) -> Result<bool> {
        Ok(self.lock()?.iter().any(|s| s.name == store))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.iter().map(|s| s.name.clone()).collect())
    }

    fn delete(&self, store: &str) -> Result<bool> {
        let mut stores = self.lock()?;
        let before = stores.len();
        stores.retain(|s| s.name != store);
        Ok(stores.len() != before)
    }

    fn lookup(&self, store: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let mut stores = self.lock()?;
        let Some(store) = stores.iter_mut().find(|s| s.name == store) else {
            return Ok(None);
        };
        Ok(store.entries.get_mut(key).map(|entry| {
            entry.last_accessed = Utc::now();
            entry.clone()
        }))
    }

    fn put(
        &self,
        store: &str,
        key: &CacheKey,
        response: &GatewayResponse,
        fetched_at: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<bool> {
        let mut stores = self.lock()?;
        let store = Self::store_mut(&mut stores, store);

        if mode == WriteMode::IfNewer {
            if let Some(existing) = store.entries.get(key) {
                if existing.fetched_at > fetched_at {
                    debug!("Skipping stale write for {} in {}", key, store.name);
                    return Ok(false);
                }
            }
        }

        let now = Utc::now();
        store.entries.insert(
            key.clone(),
            CachedEntry {
                key: key.clone(),
                response: response.clone(),
                fetched_at,
                cached_at: now,
                last_accessed: now,
            },
        );
        Ok(true)
    }

    fn put_all(
        &self,
        store: &str,
        entries: &[(CacheKey, GatewayResponse)],
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        // Single lock: readers see all of the batch or none of it.
        let mut stores = self.lock()?;
        let store = Self::store_mut(&mut stores, store);
        let now = Utc::now();
        for (key, response) in entries {
            store.entries.insert(
                key.clone(),
                CachedEntry {
                    key: key.clone(),
                    response: response.clone(),
                    fetched_at,
                    cached_at: now,
                    last_accessed: now,
                },
            );
        }
        Ok(())
    }

    fn entry_keys(&self, store: &str) -> Result<Vec<CacheKey>> {
        let stores = self.lock()?;
        Ok(stores
            .iter()
            .find(|s| s.name == store)
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn stats(&self) -> Result<CacheStats> {
        let stores = self.lock()?;
        Ok(CacheStats::from_stores(
            stores
                .iter()
                .map(|s| StoreStats {
                    name: s.name.clone(),
                    entry_count: s.entries.len(),
                    total_size_bytes: s.entries.values().map(|e| e.response.size_bytes()).sum(),
                    created_at: s.created_at,
                })
                .collect(),
        ))
    }

    fn evict(&self, store: &str, policy: &EvictionPolicy) -> Result<usize> {
        if policy.is_unbounded() {
            return Ok(0);
        }
        let mut stores = self.lock()?;
        let Some(store) = stores.iter_mut().find(|s| s.name == store) else {
            return Ok(0);
        };

        let footprints = store
            .entries
            .values()
            .map(|e| EntryFootprint {
                key: e.key.clone(),
                cached_at: e.cached_at,
                last_accessed: e.last_accessed,
                size_bytes: e.response.size_bytes(),
            })
            .collect();

        let victims = select_victims(footprints, policy, Utc::now());
        for key in &victims {
            store.entries.remove(key);
        }
        if !victims.is_empty() {
            debug!("Evicted {} entries from {}", victims.len(), store.name);
        }
        Ok(victims.len())
    }
}
