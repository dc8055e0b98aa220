//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hustly_core::{
    CacheKey, CacheStats, CacheStorage, CachedEntry, EvictionPolicy, Fetcher, GatewayConfig,
    GatewayRequest, GatewayResponse, HustlyError, Result, WriteMode,
};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

pub const ORIGIN: &str = "https://hustly.app";

pub fn test_config() -> GatewayConfig {
    GatewayConfig::default().with_origin(Url::parse(ORIGIN).unwrap())
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Fetcher answering from a scripted route table.
///
/// Unknown URLs get a 404 while online; every fetch fails while offline.
/// Like a real origin it honors request headers on 2xx routes:
/// `If-None-Match` gets an empty 304, `Range: bytes=0-N` a 206 slice, and a
/// `Cookie` personalizes the body and sets a session cookie.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, GatewayResponse>>,
    offline: AtomicBool,
    calls: Mutex<Vec<GatewayRequest>>,
}

fn range_end(value: &str) -> Option<usize> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    if start != "0" {
        return None;
    }
    end.parse().ok()
}

fn answer(request: &GatewayRequest, routed: GatewayResponse) -> GatewayResponse {
    if !routed.is_ok() {
        return routed;
    }
    let headers = &request.headers;
    if headers.contains_key("if-none-match") {
        return GatewayResponse::new(StatusCode::NOT_MODIFIED, "");
    }
    if let Some(end) = headers
        .get("range")
        .and_then(|v| v.to_str().ok())
        .and_then(range_end)
    {
        let end = (end + 1).min(routed.body.len());
        return GatewayResponse::new(StatusCode::PARTIAL_CONTENT, routed.body.slice(..end));
    }
    if let Some(cookie) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        let body = format!("{} for {}", String::from_utf8_lossy(&routed.body), cookie);
        let session = HeaderValue::from_str(&format!("sid={}", cookie)).unwrap();
        return GatewayResponse::new(routed.status, body).with_header(SET_COOKIE, session);
    }
    routed
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher that serves every shell route of `config`.
    pub fn serving_shell(config: &GatewayConfig) -> Self {
        let fetcher = Self::new();
        for route in &config.shell_routes {
            fetcher.set(route, GatewayResponse::ok(format!("shell {}", route)));
        }
        fetcher
    }

    pub fn set(&self, path: &str, response: GatewayResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.to_string())
            .collect()
    }

    /// Headers of the most recent fetch of `path`.
    pub fn last_headers(&self, path: &str) -> Option<HeaderMap> {
        let target = url(path);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|request| request.url == target)
            .map(|request| request.headers.clone())
    }

    pub fn call_count(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls().iter().filter(|c| **c == target).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        self.calls.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(HustlyError::Network {
                message: format!("GET {} failed: connection refused", request.url),
                cause: None,
            });
        }
        let routed = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| GatewayResponse::new(StatusCode::NOT_FOUND, "not found"));
        Ok(answer(request, routed))
    }
}

/// Storage wrapper whose writes can be switched to fail.
pub struct FlakyStorage<S> {
    pub inner: S,
    pub fail_writes: AtomicBool,
}

impl<S> FlakyStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    fn check(&self, store: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(HustlyError::store(store, "quota exceeded"))
        } else {
            Ok(())
        }
    }
}

impl<S: CacheStorage> CacheStorage for FlakyStorage<S> {
    fn open(&self, store: &str) -> Result<()> {
        self.inner.open(store)
    }

    fn has(&self, store: &str) -> Result<bool> {
        self.inner.has(store)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }

    fn delete(&self, store: &str) -> Result<bool> {
        self.inner.delete(store)
    }

    fn lookup(&self, store: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
        self.inner.lookup(store, key)
    }

    fn put(
        &self,
        store: &str,
        key: &CacheKey,
        response: &GatewayResponse,
        fetched_at: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<bool> {
        self.check(store)?;
        self.inner.put(store, key, response, fetched_at, mode)
    }

    fn put_all(
        &self,
        store: &str,
        entries: &[(CacheKey, GatewayResponse)],
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check(store)?;
        self.inner.put_all(store, entries, fetched_at)
    }

    fn entry_keys(&self, store: &str) -> Result<Vec<CacheKey>> {
        self.inner.entry_keys(store)
    }

    fn stats(&self) -> Result<CacheStats> {
        self.inner.stats()
    }

    fn evict(&self, store: &str, policy: &EvictionPolicy) -> Result<usize> {
        self.inner.evict(store, policy)
    }
}
