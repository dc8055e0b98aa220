//! Integration tests for the hustly-gateway binary.
//!
//! The binary is started against an in-process upstream that echoes the
//! method and path of every request, then driven over real HTTP.

use axum::http::{Method, Uri};
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

/// Start an upstream app that answers every request with its method and path.
async fn start_upstream() -> SocketAddr {
    let app = Router::new().fallback(|method: Method, uri: Uri| async move {
        format!("upstream {} {}", method, uri.path())
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct GatewayHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl GatewayHandle {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the gateway binary and wait for it to print its port.
async fn start_gateway(upstream: SocketAddr, data_dir: &std::path::Path) -> Result<GatewayHandle, String> {
    let upstream = format!("http://{}", upstream);
    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_hustly-gateway"))
        .arg("--port")
        .arg("0")
        .arg("--upstream")
        .arg(&upstream)
        .arg("--origin")
        .arg(&upstream)
        .arg("--data-dir")
        .arg(data_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn hustly-gateway: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("GATEWAY_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid GATEWAY_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read hustly-gateway stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port
        .ok_or_else(|| "GATEWAY_PORT line not emitted by hustly-gateway".to_string())?;

    // Logs share stdout; keep reading so the pipe never fills.
    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(GatewayHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

fn source(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("x-hustly-cache")
        .map(|v| v.to_str().unwrap().to_string())
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_gateway_serves_and_caches_through_upstream() {
    let upstream = start_upstream().await;
    let data_dir = TempDir::new().unwrap();
    let gateway = start_gateway(upstream, data_dir.path()).await.unwrap();
    let client = reqwest::Client::new();

    // Installed and activated against the upstream shell before printing the port.
    let health = get_json(&client, gateway.url("/__gateway/health")).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["state"], "activated");

    let stats = get_json(&client, gateway.url("/__gateway/stats")).await;
    assert_eq!(stats["stores"][0]["name"], "hustly-static-v1");
    assert_eq!(stats["total_entries"], 12);

    // Navigation is network first.
    let page = client
        .get(gateway.url("/habits"))
        .header("accept", "text/html")
        .send()
        .await
        .unwrap();
    assert_eq!(source(&page).as_deref(), Some("network"));
    assert_eq!(page.text().await.unwrap(), "upstream GET /habits");

    // Assets come from the cache on the second request.
    let first = client.get(gateway.url("/styles.css")).send().await.unwrap();
    assert_eq!(source(&first).as_deref(), Some("network"));
    let second = client.get(gateway.url("/styles.css")).send().await.unwrap();
    assert_eq!(source(&second).as_deref(), Some("cache"));
    assert_eq!(second.text().await.unwrap(), "upstream GET /styles.css");

    // Writes go straight to the upstream.
    let write = client
        .post(gateway.url("/api/habits"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(source(&write).as_deref(), Some("bypass"));
    assert_eq!(write.text().await.unwrap(), "upstream POST /api/habits");

    assert!(data_dir.path().join("gateway-cache.sqlite").exists());
}

#[tokio::test]
async fn test_gateway_push_notifications() {
    let upstream = start_upstream().await;
    let data_dir = TempDir::new().unwrap();
    let gateway = start_gateway(upstream, data_dir.path()).await.unwrap();
    let client = reqwest::Client::new();

    let pushed: Value = client
        .post(gateway.url("/__gateway/push"))
        .body(r#"{"title":"Streak at risk","url":"/habits"}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pushed["shown"], true);

    let listed = get_json(&client, gateway.url("/__gateway/notifications")).await;
    assert_eq!(listed[0]["title"], "Streak at risk");
    assert_eq!(listed[0]["options"]["tag"], "hustly-notification");

    let skipped: Value = client
        .post(gateway.url("/__gateway/push"))
        .body("garbage")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(skipped["shown"], false);
}
