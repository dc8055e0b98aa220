//! Install and activate across gateway versions.

mod common;

use chrono::Utc;
use common::{test_config, url, MockFetcher};
use hustly_core::{
    CacheKey, CacheStorage, FetchOutcome, GatewayConfig, GatewayRequest, GatewayResponse,
    HustlyError, LifecycleState, MemoryCacheStorage, OfflineGateway, SqliteCacheStorage,
    WriteMode,
};
use reqwest::StatusCode;
use std::sync::Arc;

fn unprefixed(version: &str) -> GatewayConfig {
    GatewayConfig {
        store_prefix: String::new(),
        ..test_config()
    }
    .with_version(version)
}

fn seed(storage: &dyn CacheStorage, store: &str, path: &str) {
    storage
        .put(
            store,
            &CacheKey::get(&url(path)),
            &GatewayResponse::ok(format!("{} from {}", path, store)),
            Utc::now(),
            WriteMode::Overwrite,
        )
        .unwrap();
}

#[tokio::test]
async fn test_activation_retires_previous_version() {
    let storage = Arc::new(MemoryCacheStorage::new());
    seed(storage.as_ref(), "v0-static", "/");
    seed(storage.as_ref(), "v0-dynamic", "/habits");
    seed(storage.as_ref(), "v1-static", "/");

    let config = unprefixed("v1");
    let fetcher = Arc::new(MockFetcher::serving_shell(&config));
    let gateway = OfflineGateway::new(config, storage.clone(), fetcher).unwrap();

    gateway.install().await.unwrap();
    assert_eq!(gateway.state(), LifecycleState::Installed);

    let deleted = gateway.activate().unwrap();
    assert_eq!(deleted, vec!["v0-static".to_string(), "v0-dynamic".to_string()]);
    assert_eq!(gateway.state(), LifecycleState::Activated);
    assert_eq!(storage.keys().unwrap(), vec!["v1-static".to_string()]);

    // The v1 static store now holds the freshly installed shell.
    let root = storage
        .lookup("v1-static", &CacheKey::get(&url("/")))
        .unwrap()
        .unwrap();
    assert_eq!(root.response.body, "shell /");
}

#[tokio::test]
async fn test_install_precaches_every_shell_route() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let config = test_config();
    let routes = config.shell_routes.clone();
    let fetcher = Arc::new(MockFetcher::serving_shell(&config));
    let gateway = OfflineGateway::new(config, storage.clone(), fetcher.clone()).unwrap();

    assert_eq!(gateway.install().await.unwrap(), routes.len());

    let keys = storage.entry_keys("hustly-static-v1").unwrap();
    assert_eq!(keys.len(), routes.len());
    for route in &routes {
        assert!(keys.contains(&CacheKey::get(&url(route))), "missing {}", route);
        assert_eq!(fetcher.call_count(route), 1);
    }
}

#[tokio::test]
async fn test_install_is_all_or_nothing() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let config = test_config();
    let fetcher = Arc::new(MockFetcher::serving_shell(&config));
    fetcher.set(
        "/leaderboard",
        GatewayResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
    );
    let gateway = OfflineGateway::new(config, storage.clone(), fetcher).unwrap();

    let err = gateway.install().await.unwrap_err();
    match err {
        HustlyError::InstallFailed { url, .. } => assert!(url.ends_with("/leaderboard")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gateway.state(), LifecycleState::Redundant);
    assert!(storage.entry_keys("hustly-static-v1").unwrap().is_empty());

    // A redundant gateway never intercepts.
    assert!(matches!(
        gateway.handle_fetch(GatewayRequest::get(url("/a.css"))).await,
        FetchOutcome::PassThrough(_)
    ));
    assert!(gateway.activate().is_err());
}

#[tokio::test]
async fn test_install_fails_when_offline() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let config = test_config();
    let fetcher = Arc::new(MockFetcher::serving_shell(&config));
    fetcher.set_offline(true);
    let gateway = OfflineGateway::new(config, storage.clone(), fetcher).unwrap();

    assert!(gateway.install().await.is_err());
    assert_eq!(gateway.state(), LifecycleState::Redundant);
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let config = test_config();
    let fetcher = Arc::new(MockFetcher::serving_shell(&config));
    let gateway =
        OfflineGateway::new(config, Arc::new(MemoryCacheStorage::new()), fetcher).unwrap();

    gateway.install().await.unwrap();
    assert!(matches!(
        gateway.install().await,
        Err(HustlyError::InvalidState {
            action: "install",
            state: LifecycleState::Installed
        })
    ));
}

#[tokio::test]
async fn test_new_version_keeps_old_stores_until_it_activates() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteCacheStorage::in_memory().unwrap());

    let v1 = test_config();
    let v1_fetcher = Arc::new(MockFetcher::serving_shell(&v1));
    let old = OfflineGateway::new(v1, storage.clone(), v1_fetcher.clone()).unwrap();
    old.install().await.unwrap();
    old.activate().unwrap();
    v1_fetcher.set("/old.css", GatewayResponse::ok("old"));
    old.handle_fetch(GatewayRequest::get(url("/old.css"))).await;

    let v2 = test_config().with_version("v2");
    let v2_fetcher = Arc::new(MockFetcher::serving_shell(&v2));
    let new = OfflineGateway::new(v2, storage.clone(), v2_fetcher).unwrap();
    new.install().await.unwrap();

    // Installed but waiting: the old version's stores are untouched.
    let mut names = storage.keys().unwrap();
    names.sort();
    assert_eq!(
        names,
        vec!["hustly-dynamic-v1", "hustly-static-v1", "hustly-static-v2"]
    );

    let mut deleted = new.activate().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["hustly-dynamic-v1", "hustly-static-v1"]);
    assert_eq!(storage.keys().unwrap(), vec!["hustly-static-v2".to_string()]);
}
