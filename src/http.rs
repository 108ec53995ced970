//! HTTP surface of the relay
//!
//! Serves the dashboard and client assets, the JSON status endpoints, the
//! Prometheus exposition and the signaling WebSocket routes. Every
//! response carries the configurable `X-Powered-By` header unless it was
//! disabled at startup.

use crate::runtime::RelayRuntime;
use crate::signaling;
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Directory the static client assets are served from
const CLIENT_DIR: &str = "client";

/// Dashboard page served at `/`
const DASHBOARD_FILE: &str = "dashboard.html";

/// Seconds since the unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the relay router.
pub fn build_router(runtime: Arc<RelayRuntime>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/client", get(client_page))
        .route("/api/heartbeat", get(heartbeat))
        .route("/api/metrics", get(metrics_text))
        .route("/api/servers", get(servers_json))
        .route("/websocket", get(signaling::websocket_handler))
        .route("/signal", get(signaling::websocket_handler))
        .fallback(static_assets)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&runtime),
            powered_by,
        ))
        .with_state(runtime)
}

/// Bind the configured address and serve until the shutdown signal fires.
pub async fn serve(runtime: Arc<RelayRuntime>, mut shutdown: broadcast::Receiver<bool>) -> Result<()> {
    let addr = runtime.config.http_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, build_router(runtime))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("HTTP server failed")
}

async fn powered_by(
    State(runtime): State<Arc<RelayRuntime>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if let Some(value) = &runtime.config.x_powered_by {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert("x-powered-by", value);
        }
    }
    response
}

async fn dashboard() -> Response {
    serve_file(Path::new(DASHBOARD_FILE)).await
}

async fn client_page() -> Response {
    serve_file(&Path::new(CLIENT_DIR).join("index.html")).await
}

async fn heartbeat(State(runtime): State<Arc<RelayRuntime>>) -> Response {
    let servers = runtime.registry.servers();
    let online = runtime.registry.online_count();

    Json(json!({
        "timestamp": unix_now(),
        "status": "ok",
        "go_rtc_server": {
            "status": "ok",
            "packets_to_udp": runtime.metrics.packets_to_udp(),
            "packets_from_udp": runtime.metrics.packets_from_udp(),
        },
        "cs_servers": {
            "total": servers.len(),
            "online": online,
        },
    }))
    .into_response()
}

async fn metrics_text(State(runtime): State<Arc<RelayRuntime>>) -> Response {
    let body = runtime
        .metrics
        .render_prometheus(runtime.registry.online_count(), runtime.registry.servers().len());
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

async fn servers_json(State(runtime): State<Arc<RelayRuntime>>) -> Response {
    let servers = runtime.registry.servers();
    Json(json!({
        "servers": servers,
        "count": servers.len(),
        "timestamp": unix_now(),
    }))
    .into_response()
}

/// Serve anything else from the client directory; 404 when the file does
/// not exist or the path tries to escape it.
async fn static_assets(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    if path.split('/').any(|part| part == "..") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let full: PathBuf = Path::new(CLIENT_DIR).join(path);
    serve_file(&full).await
}

async fn serve_file(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(body) => {
            let content_type = content_type_for(path);
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("wasm") => "application/wasm",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(
            content_type_for(Path::new("client/xash.wasm")),
            "application/wasm"
        );
        assert_eq!(
            content_type_for(Path::new("bundle.js")),
            "application/javascript"
        );
        assert_eq!(
            content_type_for(Path::new("data.bin")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2024-01-01 as a floor; catches a zeroed clock fallback.
        assert!(unix_now() > 1_704_067_200);
    }
}
