//! Request classification.

use crate::config::GatewayConfig;
use crate::http::GatewayRequest;
use reqwest::Method;
use std::fmt;

/// Why a request goes straight to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// The gateway is not activated yet.
    Inactive,
    NonHttpScheme,
    NonGetMethod,
    ExcludedPath,
    ExcludedHost,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::Inactive => "inactive",
            BypassReason::NonHttpScheme => "non-http-scheme",
            BypassReason::NonGetMethod => "non-get-method",
            BypassReason::ExcludedPath => "excluded-path",
            BypassReason::ExcludedHost => "excluded-host",
        }
    }
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Bypass(BypassReason),
    /// Network first, falling back to the cache.
    Navigation,
    /// Cache first with background refresh.
    Asset,
}

/// Classify a request against the configured exclusions.
///
/// Checks run in order: scheme, method, excluded path prefix, excluded host
/// substring, then navigation mode.
pub fn classify(config: &GatewayConfig, request: &GatewayRequest) -> RequestClass {
    if !matches!(request.url.scheme(), "http" | "https") {
        return RequestClass::Bypass(BypassReason::NonHttpScheme);
    }

    if request.method != Method::GET {
        return RequestClass::Bypass(BypassReason::NonGetMethod);
    }

    let path = request.url.path();
    if config
        .excluded_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return RequestClass::Bypass(BypassReason::ExcludedPath);
    }

    let host = request.url.host_str().unwrap_or_default();
    if config
        .excluded_host_substrings
        .iter()
        .any(|needle| host.contains(needle.as_str()))
    {
        return RequestClass::Bypass(BypassReason::ExcludedHost);
    }

    if request.is_navigation() {
        RequestClass::Navigation
    } else {
        RequestClass::Asset
    }
}
