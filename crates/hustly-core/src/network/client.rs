//! reqwest-backed fetcher.
//!
//! Requests can be rewritten onto an upstream origin, which is how the proxy
//! server reaches the application it fronts while cache keys keep using the
//! public URL.

use super::Fetcher;
use crate::config::NetworkConfig;
use crate::error::{HustlyError, Result};
use crate::http::{GatewayRequest, GatewayResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// HTTP fetcher built on reqwest.
pub struct HttpFetcher {
    client: Client,
    upstream: Option<Url>,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Some(NetworkConfig::REQUEST_TIMEOUT))
    }

    /// Create a fetcher with an explicit timeout. `None` never times out.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .redirect(redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HustlyError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            cause: None,
        })?;

        Ok(Self {
            client,
            upstream: None,
            timeout,
        })
    }

    /// Send every request to `upstream` instead of the request URL's host.
    pub fn with_upstream(mut self, upstream: Url) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// The URL actually requested for `url`: upstream scheme, host and port
    /// with the original path and query.
    pub fn target_url(&self, url: &Url) -> Url {
        match &self.upstream {
            Some(upstream) => {
                let mut target = upstream.clone();
                target.set_path(url.path());
                target.set_query(url.query());
                target
            }
            None => url.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let target = self.target_url(&request.url);
        debug!("{} {} -> {}", request.method, request.url, target);

        let mut builder = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(forwardable(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HustlyError::Timeout(self.timeout.unwrap_or_default())
            } else {
                HustlyError::Network {
                    message: format!("{} {} failed: {}", request.method, target, e),
                    cause: std::error::Error::source(&e).map(|s| s.to_string()),
                }
            }
        })?;

        let status = response.status();
        let headers = forwardable(response.headers());
        let body = response.bytes().await.map_err(|e| HustlyError::Network {
            message: format!("Failed to read body from {}: {}", target, e),
            cause: None,
        })?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }
}
