//! Hustly Gateway - offline caching reverse proxy.
//!
//! This binary fronts the Hustly web app with the hustly-core offline
//! gateway. It precaches the app shell at startup, serves cached pages and
//! assets when the upstream is unreachable, and exposes a small control API
//! under `/__gateway` for push, sync and notification events.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use hustly_core::{
    CacheStorage, GatewayConfig, HttpFetcher, MemoryCacheStorage, OfflineGateway,
    SqliteCacheStorage, StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "hustly-gateway")]
#[command(about = "Offline caching reverse proxy for Hustly")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Where requests are actually sent (defaults to the origin)
    #[arg(long)]
    upstream: Option<Url>,

    /// Public origin of the app; cache keys use this URL
    #[arg(long)]
    origin: Option<Url>,

    /// JSON gateway configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the SQLite cache (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long)]
    memory: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("hustly-gateway"))
        .unwrap_or_else(|| PathBuf::from(".hustly-gateway"))
}

fn open_storage(args: &Args) -> Result<Arc<dyn CacheStorage>> {
    if args.memory {
        info!("Using in-memory cache storage");
        return Ok(Arc::new(MemoryCacheStorage::new()));
    }

    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    let path = data_dir.join(StoreConfig::SQLITE_FILENAME);
    info!("Cache database: {}", path.display());
    Ok(Arc::new(SqliteCacheStorage::new(&path)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Hustly Gateway");

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(origin) = args.origin.clone() {
        config = config.with_origin(origin);
    }
    let upstream = args.upstream.clone().unwrap_or_else(|| config.origin.clone());
    info!("Origin {} via upstream {}", config.origin, upstream);

    let storage = open_storage(&args)?;
    let fetcher = HttpFetcher::with_timeout(config.network_timeout())?.with_upstream(upstream);
    let gateway = OfflineGateway::new(config, storage, Arc::new(fetcher))?;

    // Activate as soon as install finishes. A failed install leaves the
    // gateway redundant and every request passes straight through.
    match gateway.install().await {
        Ok(_) => {
            let stale = gateway.activate()?;
            if !stale.is_empty() {
                info!("Removed stale stores: {}", stale.join(", "));
            }
        }
        Err(e) => warn!("Shell precache failed, proxying without cache: {}", e),
    }

    let state = server::AppState::new(gateway);
    let addr = server::start_server(state, &args.host, args.port).await?;

    // Print port for the launcher to read (intentional stdout)
    println!("GATEWAY_PORT={}", addr.port());

    info!("Gateway running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
