//! Outbound HTTP for the gateway.
//!
//! The gateway only depends on the [`Fetcher`] trait. [`HttpFetcher`] is the
//! reqwest-backed implementation used by the proxy server.

mod client;

pub use client::{is_hop_by_hop, HttpFetcher};

use crate::error::Result;
use crate::http::{GatewayRequest, GatewayResponse};
use async_trait::async_trait;

/// Performs a network fetch on behalf of the gateway.
///
/// An `Err` means the network could not produce a response at all
/// (connection refused, DNS failure, timeout). HTTP error statuses are
/// successful fetches and come back as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse>;
}
