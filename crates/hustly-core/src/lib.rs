//! Hustly Core - offline cache gateway and notification bridge.
//!
//! This crate decides, request by request, whether the Hustly app is served
//! from a versioned cache store, from the network, or from a synthesized
//! offline response. It also turns push and periodic sync events into
//! notifications. It has no HTTP server of its own; the `hustly-gateway`
//! binary wraps it as a reverse proxy.
//!
//! # Example
//!
//! ```rust,ignore
//! use hustly_core::{GatewayConfig, HttpFetcher, MemoryCacheStorage, OfflineGateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hustly_core::Result<()> {
//!     let config = GatewayConfig::default();
//!     let fetcher = HttpFetcher::with_timeout(config.network_timeout())?;
//!     let gateway = OfflineGateway::new(
//!         config,
//!         Arc::new(MemoryCacheStorage::new()),
//!         Arc::new(fetcher),
//!     )?;
//!
//!     gateway.install().await?;
//!     let stale = gateway.activate()?;
//!     println!("Removed {} stale stores", stale.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod notifications;
pub mod sync;

pub use cache::{
    CacheStats, CacheStorage, CachedEntry, EvictionPolicy, MemoryCacheStorage,
    SqliteCacheStorage, StoreStats, WriteMode,
};
pub use config::{GatewayConfig, NetworkConfig, NotificationSettings, StoreConfig};
pub use error::{HustlyError, Result};
pub use gateway::{BypassReason, FetchOutcome, OfflineGateway, RequestClass, ResponseSource, Served};
pub use http::{CacheKey, GatewayRequest, GatewayResponse, RequestMode};
pub use lifecycle::LifecycleState;
pub use network::{Fetcher, HttpFetcher};
pub use notifications::{
    ClickOutcome, ClientRegistry, Notification, NotificationBridge, NotificationOutbox,
    NotificationSink, PushOutcome, PushPayload, SkipReason, WindowClient, WindowClients,
};
pub use sync::{dispatch_sync, LoggingSyncHandler, PeriodicTag, SyncHandler, SyncTag};
