//! Gateway lifecycle: install (precache the shell) and activate (retire
//! stores from older versions).

use crate::cache::CacheStorage;
use crate::config::GatewayConfig;
use crate::error::{HustlyError, Result};
use crate::http::GatewayRequest;
use crate::network::Fetcher;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Lifecycle states of a gateway registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, nothing cached yet.
    Parsed,
    Installing,
    /// Shell precached; may activate without waiting.
    Installed,
    Activating,
    /// Intercepting fetches and controlling clients.
    Activated,
    /// Install failed; this registration will never intercept.
    Redundant,
}

impl LifecycleState {
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, LifecycleState::Activated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Fetch every shell route and write them into the static store in one
/// bulk operation.
///
/// Any transport failure or non-success status aborts the whole install and
/// leaves the store without any of the batch. Returns the number of
/// precached routes.
pub async fn precache_shell(
    config: &GatewayConfig,
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
) -> Result<usize> {
    let store = config.static_store_name();
    info!("Caching static assets into {}", store);
    storage.open(&store)?;

    let requests = config
        .shell_routes
        .iter()
        .map(|route| config.resolve(route).map(GatewayRequest::get))
        .collect::<Result<Vec<_>>>()?;

    let fetched_at = Utc::now();
    let entries = try_join_all(requests.into_iter().map(|request| async move {
        let response = fetcher
            .fetch(&request)
            .await
            .map_err(|e| HustlyError::InstallFailed {
                url: request.url.to_string(),
                message: e.to_string(),
            })?;
        if !response.is_ok() || !response.is_storable() {
            return Err(HustlyError::InstallFailed {
                url: request.url.to_string(),
                message: format!("status {}", response.status),
            });
        }
        debug!("Precached {}", request.url);
        Ok((request.cache_key(), response.without_private_headers()))
    }))
    .await?;

    storage.put_all(&store, &entries, fetched_at)?;
    Ok(entries.len())
}

/// Delete every store that does not belong to the current version.
///
/// Returns the deleted store names.
pub fn purge_stale_stores(config: &GatewayConfig, storage: &dyn CacheStorage) -> Result<Vec<String>> {
    let current = config.current_store_names();
    let mut deleted = Vec::new();

    for name in storage.keys()? {
        if current.contains(&name) {
            continue;
        }
        if storage.delete(&name)? {
            info!("Deleted stale cache store {}", name);
            deleted.push(name);
        }
    }

    Ok(deleted)
}
