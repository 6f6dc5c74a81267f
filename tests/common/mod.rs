//! Shared utilities for integration testing.
//!
//! Backends and the gateway all listen on ephemeral loopback ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gateway_proxy::config::{GatewayConfig, ServiceConfig};
use gateway_proxy::net::tls::load_tls_config;
use gateway_proxy::{HttpServer, Shutdown};

pub const PLUGIN_ID: &str = "org.example.app";

/// Test CA that signed [`BACKEND_CERT`].
pub const CA_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ca.crt");
/// Backend certificate for `127.0.0.1` and `localhost`.
pub const BACKEND_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/backend.crt");
pub const BACKEND_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/backend.key");

/// Gateway URL prefix for a service of [`PLUGIN_ID`].
pub fn mount(gateway: SocketAddr, service: &str) -> String {
    format!("http://{gateway}/ZLUX/plugins/{PLUGIN_ID}/services/{service}/_current")
}

pub fn service(name: &str, backend: SocketAddr) -> ServiceConfig {
    ServiceConfig {
        plugin_id: PLUGIN_ID.into(),
        service_name: name.into(),
        host: Some(backend.ip().to_string()),
        port: Some(backend.port()),
        ..Default::default()
    }
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(listener: TcpListener, app: Router) -> SocketAddr {
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start the gateway for `config`.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    start_server(HttpServer::new(config).unwrap()).await
}

/// Start an already-built gateway server.
pub async fn start_server(server: HttpServer) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });
    (addr, shutdown)
}

/// HTTP client that neither follows redirects nor uses a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// Start an HTTP backend on `listener`.
pub async fn start_http_backend_on(listener: TcpListener) -> SocketAddr {
    let addr = listener.local_addr().unwrap();
    serve(listener, http_backend_app(addr)).await
}

pub async fn start_http_backend() -> SocketAddr {
    start_http_backend_on(TcpListener::bind("127.0.0.1:0").await.unwrap()).await
}

/// HTTP backend routes.
///
/// - `/api/echo` answers with a JSON description of the request it received
/// - `/api/redirect` redirects to the relative path `/landing`
/// - `/api/redirect-absolute` redirects to `http://<backend>/next?step=2`
/// - `/api/status/{code}` answers with that status
/// - `/api/hang` never answers
fn http_backend_app(addr: SocketAddr) -> Router {
    Router::new()
        .route("/api/echo", any(echo))
        .route("/api/redirect", get(|| async { redirect("/landing".to_string()) }))
        .route(
            "/api/redirect-absolute",
            get(move || async move { redirect(format!("http://{addr}/next?step=2")) }),
        )
        .route(
            "/api/status/{code}",
            get(|Path(code): Path<u16>| async move {
                StatusCode::from_u16(code).unwrap_or(StatusCode::IM_A_TEAPOT)
            }),
        )
        .route(
            "/api/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                StatusCode::OK
            }),
        )
}

fn redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn echo(request: Request<Body>) -> Json<serde_json::Value> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, 1024 * 1024).await.unwrap_or_default();
    let headers: serde_json::Map<String, serde_json::Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                serde_json::Value::from(value.to_str().unwrap_or_default()),
            )
        })
        .collect();

    Json(serde_json::json!({
        "method": parts.method.as_str(),
        "url": parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Start a WebSocket backend.
///
/// The receiver yields the code of every close frame the backend received.
pub async fn start_ws_backend() -> (SocketAddr, mpsc::UnboundedReceiver<u16>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    (serve(listener, ws_backend_app(tx)).await, rx)
}

/// Start a backend serving both the HTTP and WebSocket routes over TLS with
/// [`BACKEND_CERT`].
pub async fn start_tls_backend() -> (SocketAddr, mpsc::UnboundedReceiver<u16>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let tls = load_tls_config(FsPath::new(BACKEND_CERT), FsPath::new(BACKEND_KEY))
        .await
        .unwrap();
    let app = http_backend_app(addr).merge(ws_backend_app(tx));
    tokio::spawn(async move {
        let _ = axum_server::from_tcp_rustls(listener, tls)
            .serve(app.into_make_service())
            .await;
    });
    (addr, rx)
}

/// WebSocket backend routes.
///
/// - `/ws/echo` echoes text and binary frames
/// - `/ws/close/{code}` closes with `code` after the first data frame
/// - `/ws/drop` drops the connection, without a close frame, after the first data frame
/// - `/ws/ping` answers a ping with `ping:<payload>`, a pong with
///   `pong:<payload>`, and the text `send-ping` with a ping of `from-backend`
fn ws_backend_app(closes: mpsc::UnboundedSender<u16>) -> Router {
    Router::new()
        .route("/ws/echo", get(ws_echo))
        .route("/ws/close/{code}", get(ws_close_after_first))
        .route("/ws/drop", get(ws_drop_after_first))
        .route("/ws/ping", get(ws_ping))
        .with_state(closes)
}

async fn ws_echo(
    ws: WebSocketUpgrade,
    State(closes): State<mpsc::UnboundedSender<u16>>,
) -> Response {
    ws.on_upgrade(move |socket| echo_session(socket, closes))
}

async fn echo_session(mut socket: WebSocket, closes: mpsc::UnboundedSender<u16>) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Close(frame) => {
                let _ = closes.send(frame.map_or(1005, |f| f.code));
                break;
            }
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
}

async fn ws_close_after_first(ws: WebSocketUpgrade, Path(code): Path<u16>) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        if let Some(Ok(_)) = socket.recv().await {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: "bye".into(),
                })))
                .await;
        }
        // Drain until the peer answers the close.
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn ws_drop_after_first(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket.recv().await;
        drop(socket);
    })
}

async fn ws_ping(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            let reply = match message {
                Message::Ping(payload) => {
                    Message::Text(format!("ping:{}", String::from_utf8_lossy(&payload)).into())
                }
                Message::Pong(payload) => {
                    Message::Text(format!("pong:{}", String::from_utf8_lossy(&payload)).into())
                }
                Message::Text(text) if text.as_str() == "send-ping" => {
                    Message::Ping("from-backend".into())
                }
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}
