//! HTTP server implementation using Axum.

use crate::handler::{
    handle_click, handle_health, handle_notifications, handle_periodic_sync, handle_proxy,
    handle_push, handle_register_client, handle_stats, handle_sync,
};
use axum::{
    routing::{get, post},
    Router,
};
use hustly_core::{
    ClientRegistry, LoggingSyncHandler, NotificationBridge, NotificationOutbox, OfflineGateway,
    SyncHandler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Prefix of the control API. Everything outside it is proxied.
pub const CONTROL_PREFIX: &str = "/__gateway";

/// Requests handled at once before new ones queue.
const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Application state shared across handlers.
pub struct AppState {
    /// Offline cache gateway (lifecycle, stores, fetcher)
    pub gateway: OfflineGateway,
    /// Push and periodic sync handling
    pub bridge: NotificationBridge,
    /// Notifications currently on display
    pub outbox: Arc<NotificationOutbox>,
    /// Windows known to the gateway
    pub clients: Arc<ClientRegistry>,
    /// Receives background sync events
    pub sync_handler: Arc<dyn SyncHandler>,
}

impl AppState {
    pub fn new(gateway: OfflineGateway) -> Arc<Self> {
        let outbox = Arc::new(NotificationOutbox::new());
        let clients = Arc::new(ClientRegistry::new());
        let bridge = NotificationBridge::new(
            gateway.config().notifications.clone(),
            gateway.config().origin.clone(),
            outbox.clone(),
            clients.clone(),
        );
        Arc::new(Self {
            gateway,
            bridge,
            outbox,
            clients,
            sync_handler: Arc::new(LoggingSyncHandler),
        })
    }
}

/// Build the router: control API under [`CONTROL_PREFIX`], proxy for the rest.
pub fn build_router(state: Arc<AppState>) -> Router {
    // The control API is called from app pages, so it answers CORS preflights.
    // Proxied responses keep whatever CORS headers the upstream sent.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control = Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/push", post(handle_push))
        .route("/sync/:tag", post(handle_sync))
        .route("/periodic-sync/:tag", post(handle_periodic_sync))
        .route("/clients", post(handle_register_client))
        .route("/notifications", get(handle_notifications))
        .route("/notifications/:id/click", post(handle_click))
        .layer(cors);

    Router::new()
        .nest(CONTROL_PREFIX, control)
        .fallback(handle_proxy)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS)),
        )
        .with_state(state)
}

/// Start the gateway HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
