//! The offline cache gateway.
//!
//! [`OfflineGateway`] sits between the platform's network stack and the app
//! shell. For every intercepted request it picks one of three strategies:
//!
//! - pass through untouched (non-HTTP, non-GET, excluded paths and hosts)
//! - network first with cache fallback (navigations)
//! - cache first with background refresh (everything else)
//!
//! Fetches whose answers may be cached go upstream without validators,
//! ranges or credentials, and cached copies never carry `Set-Cookie`.
//! Cache writes never fail a request. They are logged and dropped.

mod classify;

pub use classify::{classify, BypassReason, RequestClass};

use crate::cache::{CacheStats, CacheStorage, CachedEntry, WriteMode};
use crate::config::GatewayConfig;
use crate::error::{HustlyError, Result};
use crate::http::{CacheKey, GatewayRequest, GatewayResponse};
use crate::lifecycle::{self, LifecycleState};
use crate::network::Fetcher;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Exact match in one of the current stores.
    Cache,
    /// The cached root page, served for an uncached offline navigation.
    RootFallback,
    /// The synthesized 503.
    Offline,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::RootFallback => "root-fallback",
            ResponseSource::Offline => "offline",
        }
    }
}

/// A response the gateway chose to serve.
#[derive(Debug)]
pub struct Served {
    pub response: GatewayResponse,
    pub source: ResponseSource,
    /// Background refresh started for a cache hit. Awaiting it waits for the
    /// store update; dropping it lets the refresh finish on its own.
    pub revalidation: Option<JoinHandle<()>>,
}

/// The gateway's decision for one request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the platform's default network handling applies.
    PassThrough(BypassReason),
    Respond(Served),
    /// An offline navigation with nothing cached to show.
    Unhandled,
}

impl FetchOutcome {
    pub fn served(&self) -> Option<&Served> {
        match self {
            FetchOutcome::Respond(served) => Some(served),
            _ => None,
        }
    }

    pub fn into_served(self) -> Option<Served> {
        match self {
            FetchOutcome::Respond(served) => Some(served),
            _ => None,
        }
    }
}

struct GatewayInner {
    config: GatewayConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<LifecycleState>,
}

/// Offline cache gateway over a pair of versioned stores.
///
/// Cloning is cheap; clones share state, storage and fetcher.
#[derive(Clone)]
pub struct OfflineGateway {
    inner: Arc<GatewayInner>,
}

impl OfflineGateway {
    pub fn new(
        config: GatewayConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                storage,
                fetcher,
                state: RwLock::new(LifecycleState::Parsed),
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.inner.storage
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.inner.fetcher
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: LifecycleState) {
        *self.inner.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        debug!("Gateway {} is now {}", self.inner.config.version, state);
    }

    /// Move `from` to `to`, or fail if the gateway is elsewhere.
    fn transition(&self, action: &'static str, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(HustlyError::InvalidState {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Precache the shell into the static store.
    ///
    /// On failure the registration becomes redundant. On success the gateway
    /// is installed and can activate straight away.
    pub async fn install(&self) -> Result<usize> {
        self.transition("install", LifecycleState::Parsed, LifecycleState::Installing)?;

        let inner = &self.inner;
        match lifecycle::precache_shell(&inner.config, inner.storage.as_ref(), inner.fetcher.as_ref())
            .await
        {
            Ok(count) => {
                self.set_state(LifecycleState::Installed);
                info!("Installed gateway {} ({} shell routes)", inner.config.version, count);
                Ok(count)
            }
            Err(e) => {
                self.set_state(LifecycleState::Redundant);
                warn!("Install failed: {}", e);
                Err(e)
            }
        }
    }

    /// Delete stores from other versions and start intercepting fetches.
    ///
    /// Returns the names of the deleted stores.
    pub fn activate(&self) -> Result<Vec<String>> {
        self.transition("activate", LifecycleState::Installed, LifecycleState::Activating)?;

        match lifecycle::purge_stale_stores(&self.inner.config, self.inner.storage.as_ref()) {
            Ok(deleted) => {
                self.set_state(LifecycleState::Activated);
                info!("Activated gateway {}; claiming clients", self.inner.config.version);
                Ok(deleted)
            }
            Err(e) => {
                self.set_state(LifecycleState::Installed);
                Err(e)
            }
        }
    }

    pub fn classify(&self, request: &GatewayRequest) -> RequestClass {
        classify(&self.inner.config, request)
    }

    /// Decide how to answer an intercepted request.
    pub async fn handle_fetch(&self, request: GatewayRequest) -> FetchOutcome {
        if !self.state().can_intercept_fetch() {
            return FetchOutcome::PassThrough(BypassReason::Inactive);
        }

        match self.classify(&request) {
            RequestClass::Bypass(reason) => {
                debug!("Passing through {} {} ({})", request.method, request.url, reason);
                FetchOutcome::PassThrough(reason)
            }
            RequestClass::Navigation => self.network_first(request).await,
            RequestClass::Asset => FetchOutcome::Respond(self.cache_first(request).await),
        }
    }

    pub fn stats(&self) -> Result<CacheStats> {
        self.inner.storage.stats()
    }

    async fn network_first(&self, request: GatewayRequest) -> FetchOutcome {
        let key = request.cache_key();
        let fetched_at = Utc::now();

        match self.inner.fetch_shared(&request).await {
            Ok(response) => {
                self.inner.store_dynamic(&key, &response, fetched_at);
                FetchOutcome::Respond(Served {
                    response,
                    source: ResponseSource::Network,
                    revalidation: None,
                })
            }
            Err(e) => {
                debug!("Navigation to {} failed ({}), trying cache", request.url, e);
                if let Some(entry) = self.inner.lookup(&key) {
                    return FetchOutcome::Respond(Served {
                        response: entry.response,
                        source: ResponseSource::Cache,
                        revalidation: None,
                    });
                }
                match self.inner.lookup_root() {
                    Some(entry) => FetchOutcome::Respond(Served {
                        response: entry.response,
                        source: ResponseSource::RootFallback,
                        revalidation: None,
                    }),
                    None => FetchOutcome::Unhandled,
                }
            }
        }
    }

    async fn cache_first(&self, request: GatewayRequest) -> Served {
        let key = request.cache_key();

        if let Some(entry) = self.inner.lookup(&key) {
            let inner = Arc::clone(&self.inner);
            let revalidation = tokio::spawn(async move {
                inner.revalidate(request, key).await;
            });
            return Served {
                response: entry.response,
                source: ResponseSource::Cache,
                revalidation: Some(revalidation),
            };
        }

        let fetched_at = Utc::now();
        match self.inner.fetch_shared(&request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.inner.store_dynamic(&key, &response, fetched_at);
                }
                Served {
                    response,
                    source: ResponseSource::Network,
                    revalidation: None,
                }
            }
            Err(e) => {
                debug!("Fetch of {} failed ({}), serving offline response", request.url, e);
                Served {
                    response: GatewayResponse::offline(&self.inner.config.offline_body),
                    source: ResponseSource::Offline,
                    revalidation: None,
                }
            }
        }
    }
}

impl GatewayInner {
    fn write_mode(&self) -> WriteMode {
        if self.config.sequenced_writes {
            WriteMode::IfNewer
        } else {
            WriteMode::Overwrite
        }
    }

    /// Fetch a request whose response may be stored and served to anyone.
    ///
    /// Validators, ranges and credentials stay behind, and cookies set by
    /// the answer are dropped.
    async fn fetch_shared(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let response = self
            .fetcher
            .fetch(&request.without_caller_headers())
            .await?;
        Ok(response.without_private_headers())
    }

    /// Write into the dynamic store, swallowing failures. Partial and
    /// not-modified responses are never written.
    fn store_dynamic(&self, key: &CacheKey, response: &GatewayResponse, fetched_at: DateTime<Utc>) {
        if !response.is_storable() {
            debug!("Not caching {} response for {}", response.status, key);
            return;
        }
        let store = self.config.dynamic_store_name();
        if let Err(e) = self
            .storage
            .put(&store, key, response, fetched_at, self.write_mode())
        {
            warn!("Cache put failed for {}: {}", key, e);
            return;
        }

        if !self.config.eviction.is_unbounded() {
            if let Err(e) = self.storage.evict(&store, &self.config.eviction) {
                warn!("Eviction failed for {}: {}", store, e);
            }
        }
    }

    /// Look up a key in the current stores, dynamic first. Lookup errors
    /// count as misses.
    fn lookup(&self, key: &CacheKey) -> Option<CachedEntry> {
        match self.storage.lookup_any(&self.config.current_store_names(), key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    fn lookup_root(&self) -> Option<CachedEntry> {
        let root = self.config.root_url().ok()?;
        self.lookup(&CacheKey::get(&root))
    }

    async fn revalidate(&self, request: GatewayRequest, key: CacheKey) {
        let fetched_at = Utc::now();
        match self.fetch_shared(&request).await {
            Ok(response) if response.is_ok() && response.is_storable() => {
                self.store_dynamic(&key, &response, fetched_at);
                debug!("Refreshed {}", key);
            }
            Ok(response) => debug!("Refresh of {} returned {}, keeping cached copy", key, response.status),
            Err(e) => debug!("Refresh of {} failed: {}", key, e),
        }
    }
}
