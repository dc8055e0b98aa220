//! Centralized configuration for the Hustly gateway.
//!
//! Constants live on marker structs grouped by concern. The runtime
//! configuration is [`GatewayConfig`], a versioned record from which both
//! cache store names are derived.

use crate::cache::EvictionPolicy;
use crate::error::{HustlyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Cache store naming and the precached shell.
pub struct StoreConfig;

impl StoreConfig {
    pub const DEFAULT_PREFIX: &'static str = "hustly";
    pub const DEFAULT_VERSION: &'static str = "v1";
    pub const DEFAULT_ORIGIN: &'static str = "http://localhost:3000";
    pub const ROOT_PATH: &'static str = "/";
    pub const SHELL_ROUTES: [&'static str; 12] = [
        "/",
        "/habits",
        "/goals",
        "/achievements",
        "/analytics",
        "/challenges",
        "/chat",
        "/finance",
        "/vision",
        "/ideas",
        "/leaderboard",
        "/manifest.json",
    ];
    pub const EXCLUDED_PATH_PREFIXES: [&'static str; 2] = ["/api/", "/_next/"];
    pub const EXCLUDED_HOST_SUBSTRINGS: [&'static str; 1] = ["supabase"];
    pub const OFFLINE_BODY: &'static str = "Offline";
    pub const SQLITE_FILENAME: &'static str = "gateway-cache.sqlite";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "Hustly-Gateway/0.1";
    /// Largest request body the proxy will buffer before forwarding.
    pub const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;
}

/// Notification defaults shared by push and periodic wake-ups.
pub struct NotificationConfig;

impl NotificationConfig {
    pub const DEFAULT_TITLE: &'static str = "Hustly";
    pub const DEFAULT_BODY: &'static str = "New notification from Hustly";
    pub const DEFAULT_URL: &'static str = "/";
    pub const DEFAULT_TAG: &'static str = "hustly-notification";
    pub const ICON: &'static str = "/icons/icon-192x192.svg";
    pub const BADGE: &'static str = "/favicon.svg";
    pub const VIBRATE: [u32; 3] = [100, 50, 100];
    pub const DISMISS_ACTION: &'static str = "dismiss";
    pub const OPEN_ACTION: &'static str = "open";

    pub const MORNING_TITLE: &'static str = "☀️ Good Morning, Hustler!";
    pub const MORNING_BODY: &'static str = "Time to check your habits and start the day strong!";
    pub const MORNING_URL: &'static str = "/habits";
    pub const MORNING_START_HOUR: u32 = 6;
    pub const MORNING_END_HOUR: u32 = 9;
}

/// Notification settings carried by [`GatewayConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub default_title: String,
    pub default_body: String,
    pub default_url: String,
    pub default_tag: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// First local hour (inclusive) in which the morning briefing is shown.
    pub morning_start_hour: u32,
    /// Last local hour (inclusive) in which the morning briefing is shown.
    pub morning_end_hour: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            default_title: NotificationConfig::DEFAULT_TITLE.to_string(),
            default_body: NotificationConfig::DEFAULT_BODY.to_string(),
            default_url: NotificationConfig::DEFAULT_URL.to_string(),
            default_tag: NotificationConfig::DEFAULT_TAG.to_string(),
            icon: NotificationConfig::ICON.to_string(),
            badge: NotificationConfig::BADGE.to_string(),
            vibrate: NotificationConfig::VIBRATE.to_vec(),
            morning_start_hour: NotificationConfig::MORNING_START_HOUR,
            morning_end_hour: NotificationConfig::MORNING_END_HOUR,
        }
    }
}

/// Versioned gateway configuration.
///
/// Store names are derived from `store_prefix` and `version`, so bumping the
/// version is the only thing a deployment has to change to retire every
/// store the previous version created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix shared by every store this gateway owns.
    pub store_prefix: String,
    /// Deployment version identifier.
    pub version: String,
    /// Public origin of the application the gateway fronts.
    pub origin: Url,
    /// Paths precached into the static store at install time.
    pub shell_routes: Vec<String>,
    /// Path prefixes that always bypass the cache.
    pub excluded_path_prefixes: Vec<String>,
    /// Host substrings that always bypass the cache.
    pub excluded_host_substrings: Vec<String>,
    /// Body of the synthesized 503 response.
    pub offline_body: String,
    /// Per-request network timeout in seconds. `None` waits forever.
    pub network_timeout_secs: Option<u64>,
    /// Skip cache writes whose fetch started before the stored entry's.
    pub sequenced_writes: bool,
    /// Bounds applied to the dynamic store after each write.
    pub eviction: EvictionPolicy,
    pub notifications: NotificationSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_prefix: StoreConfig::DEFAULT_PREFIX.to_string(),
            version: StoreConfig::DEFAULT_VERSION.to_string(),
            origin: Url::parse(StoreConfig::DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            shell_routes: StoreConfig::SHELL_ROUTES.iter().map(|s| s.to_string()).collect(),
            excluded_path_prefixes: StoreConfig::EXCLUDED_PATH_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_host_substrings: StoreConfig::EXCLUDED_HOST_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            offline_body: StoreConfig::OFFLINE_BODY.to_string(),
            network_timeout_secs: Some(NetworkConfig::REQUEST_TIMEOUT.as_secs()),
            sequenced_writes: false,
            eviction: EvictionPolicy::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw =
            std::fs::read_to_string(path).map_err(|e| HustlyError::io_with_path(e, path))?;
        let config: GatewayConfig = serde_json::from_str(&raw).map_err(|e| HustlyError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the version identifier.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the public origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Name of the store holding the precached shell.
    pub fn static_store_name(&self) -> String {
        self.store_name("static")
    }

    /// Name of the store filled lazily at fetch time.
    pub fn dynamic_store_name(&self) -> String {
        self.store_name("dynamic")
    }

    /// Both store names owned by the current version, dynamic first.
    pub fn current_store_names(&self) -> [String; 2] {
        [self.dynamic_store_name(), self.static_store_name()]
    }

    fn store_name(&self, kind: &str) -> String {
        if self.store_prefix.is_empty() {
            format!("{}-{}", self.version, kind)
        } else {
            format!("{}-{}-{}", self.store_prefix, kind, self.version)
        }
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve an app-relative path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin.join(path).map_err(|e| HustlyError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
    }

    /// URL of the root page used as the offline navigation fallback.
    pub fn root_url(&self) -> Result<Url> {
        self.resolve(StoreConfig::ROOT_PATH)
    }

    /// Check the record for values the gateway cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(HustlyError::Config {
                message: "version must not be empty".to_string(),
            });
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(HustlyError::Config {
                message: format!("origin must be http(s), got {}", self.origin),
            });
        }
        if let Some(route) = self.shell_routes.iter().find(|r| !r.starts_with('/')) {
            return Err(HustlyError::Config {
                message: format!("shell route must start with '/': {}", route),
            });
        }
        let n = &self.notifications;
        if n.morning_start_hour > n.morning_end_hour || n.morning_end_hour > 23 {
            return Err(HustlyError::Config {
                message: format!(
                    "invalid morning window {}..={}",
                    n.morning_start_hour, n.morning_end_hour
                ),
            });
        }
        Ok(())
    }
}
