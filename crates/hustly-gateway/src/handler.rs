//! Request handlers: the caching proxy and the control API.

use crate::server::AppState;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hustly_core::network::is_hop_by_hop;
use hustly_core::{
    dispatch_sync, ClickOutcome, FetchOutcome, GatewayConfig, GatewayRequest, GatewayResponse,
    HustlyError, NetworkConfig, PushOutcome, RequestMode, SkipReason,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-hustly-cache";

/// Value of [`SOURCE_HEADER`] for requests the gateway did not intercept.
const BYPASS_SOURCE: &str = "bypass";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

fn hustly_error_response(e: &HustlyError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, e.to_string())
}

// ============================================================================
// Proxy
// ============================================================================

/// Work out the request mode from fetch metadata, falling back to `Accept`.
fn request_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
    if let Some(mode) = headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
        .and_then(RequestMode::from_fetch_mode)
    {
        return mode;
    }

    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    if *method == Method::GET && wants_html {
        RequestMode::Navigate
    } else {
        RequestMode::default()
    }
}

/// Rebuild an incoming request as the gateway sees it: on the public origin.
async fn to_gateway_request(
    config: &GatewayConfig,
    request: Request,
) -> Result<GatewayRequest, Response> {
    let (parts, body) = request.into_parts();

    let mut url: Url = config.origin.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let body = to_bytes(body, NetworkConfig::MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()))?;

    let mode = request_mode(&parts.method, &parts.headers);
    let mut gateway_request = GatewayRequest::new(parts.method, url).with_mode(mode);
    gateway_request.headers = parts.headers;
    gateway_request.body = body;
    Ok(gateway_request)
}

fn into_response(response: GatewayResponse, source: &'static str) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    for (name, value) in response.headers.iter() {
        if !is_hop_by_hop(name) {
            out.headers_mut().append(name.clone(), value.clone());
        }
    }
    out.headers_mut().insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source),
    );
    out
}

/// Everything outside the control API lands here.
pub async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let request = match to_gateway_request(state.gateway.config(), request).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.gateway.handle_fetch(request.clone()).await {
        FetchOutcome::Respond(served) => into_response(served.response, served.source.as_str()),
        FetchOutcome::PassThrough(reason) => {
            debug!("Forwarding {} {} ({})", request.method, request.url, reason);
            match state.gateway.fetcher().fetch(&request).await {
                Ok(response) => into_response(response, BYPASS_SOURCE),
                Err(e) if e.is_network() => {
                    warn!("Upstream request failed: {}", e);
                    hustly_error_response(&e)
                }
                Err(e) => {
                    error!("Could not forward {}: {}", request.url, e);
                    error_response(StatusCode::BAD_GATEWAY, e.to_string())
                }
            }
        }
        FetchOutcome::Unhandled => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            format!("{} is offline and not cached", request.url),
        ),
    }
}

// ============================================================================
// Control API
// ============================================================================

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "state": state.gateway.state(),
        "version": state.gateway.config().version,
    }))
}

pub async fn handle_stats(State(state): State<Arc<AppState>>) -> Response {
    match state.gateway.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!("Failed to read cache stats: {}", e);
            hustly_error_response(&e)
        }
    }
}

fn skip_reason(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::EmptyPayload => "empty_payload",
        SkipReason::InvalidPayload => "invalid_payload",
    }
}

/// Deliver a push message. The request body is the raw push data.
pub async fn handle_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.bridge.on_push(Some(&body[..])).await {
        Ok(PushOutcome::Shown(notification)) => {
            Json(json!({"shown": true, "notification": notification})).into_response()
        }
        Ok(PushOutcome::Skipped(reason)) => {
            Json(json!({"shown": false, "reason": skip_reason(reason)})).into_response()
        }
        Err(e) => hustly_error_response(&e),
    }
}

pub async fn handle_sync(State(state): State<Arc<AppState>>, Path(tag): Path<String>) -> Response {
    match dispatch_sync(state.sync_handler.as_ref(), &tag).await {
        Ok(handled) => Json(json!({"tag": tag, "handled": handled.is_some()})).into_response(),
        Err(e) => hustly_error_response(&e),
    }
}

pub async fn handle_periodic_sync(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Response {
    match state.bridge.on_periodic_sync(&tag).await {
        Ok(notification) => Json(json!({"tag": tag, "notification": notification})).into_response(),
        Err(e) => hustly_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterClient {
    pub url: Url,
}

/// Record a window that has the app open.
pub async fn handle_register_client(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterClient>,
) -> impl IntoResponse {
    Json(state.clients.register(request.url).await)
}

pub async fn handle_notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.outbox.list().await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ClickRequest {
    #[serde(default)]
    pub action: Option<String>,
}

/// Click a notification on display. The body may name an action.
pub async fn handle_click(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let click: ClickRequest = if body.is_empty() {
        ClickRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(click) => click,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    let Some(notification) = state.outbox.get(id).await else {
        return error_response(StatusCode::NOT_FOUND, format!("No notification {}", id));
    };

    match state
        .bridge
        .on_notification_click(&notification, click.action.as_deref())
        .await
    {
        Ok(ClickOutcome::Dismissed) => Json(json!({"outcome": "dismissed"})).into_response(),
        Ok(ClickOutcome::Focused { client_id, url }) => Json(json!({
            "outcome": "focused",
            "client_id": client_id,
            "url": url,
        }))
        .into_response(),
        Ok(ClickOutcome::Opened { client_id, url }) => Json(json!({
            "outcome": "opened",
            "client_id": client_id,
            "url": url,
        }))
        .into_response(),
        Err(e) => hustly_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_fetch_mode_header_wins() {
        let h = headers(&[("sec-fetch-mode", "no-cors"), ("accept", "text/html")]);
        assert_eq!(request_mode(&Method::GET, &h), RequestMode::NoCors);

        let h = headers(&[("sec-fetch-mode", "navigate")]);
        assert_eq!(request_mode(&Method::GET, &h), RequestMode::Navigate);
    }

    #[test]
    fn test_accept_html_fallback() {
        let h = headers(&[("accept", "text/html,*/*;q=0.8")]);
        assert_eq!(request_mode(&Method::GET, &h), RequestMode::Navigate);
        assert_eq!(request_mode(&Method::POST, &h), RequestMode::Cors);

        let h = headers(&[("accept", "text/css")]);
        assert_eq!(request_mode(&Method::GET, &h), RequestMode::Cors);
    }

    #[test]
    fn test_response_drops_hop_by_hop_headers() {
        let upstream = GatewayResponse::ok("hi")
            .with_header(header::CONNECTION, HeaderValue::from_static("keep-alive"))
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let response = into_response(upstream, "cache");
        assert!(response.headers().get(header::CONNECTION).is_none());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[SOURCE_HEADER], "cache");
    }
}
