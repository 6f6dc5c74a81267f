//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router mounting every configured service
//! - Wire up middleware (tracing, request ID)
//! - Dispatch upgrade requests to the WebSocket relay, the rest to the HTTP proxy
//! - Serve plain or TLS connections until shutdown

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, State, WebSocketUpgrade},
    http::{Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Extension, Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::proxy::HttpProxy;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::http::response::{ClientOrigin, ListenerScheme};
use crate::http::websocket::WebSocketProxy;
use crate::net::tls::load_tls_config;
use crate::net::SessionTracker;
use crate::routing::{Route, RouteError, ServiceRouter};

/// Time in-flight requests get to finish once shutdown starts on a TLS listener.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Both proxies for one mounted service.
#[derive(Clone)]
struct MountedService {
    http: HttpProxy,
    websocket: WebSocketProxy,
}

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    services: Arc<ServiceRouter<MountedService>>,
}

/// Gateway server.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    sessions: SessionTracker,
    service_count: usize,
}

impl HttpServer {
    /// Create a server for every service in `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        Self::with_routes(config, |route| route)
    }

    /// Like [`HttpServer::new`], passing each route through `customize`
    /// first. This is where header and authorization hooks get attached.
    pub fn with_routes<F>(config: GatewayConfig, customize: F) -> Result<Self, ServerError>
    where
        F: Fn(Route) -> Route,
    {
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let sessions = SessionTracker::new();
        let mut services = ServiceRouter::new();

        for service in &config.services {
            let route = Arc::new(customize(Route::new(service)?));
            tracing::info!(
                service = %route.key(),
                backend = %format!("{}://{}:{}{}", route.http_scheme(), route.host(), route.port(), route.url_prefix()),
                "Mounting service"
            );

            let mounted = MountedService {
                http: HttpProxy::new(Arc::clone(&route), connect_timeout, request_timeout)?,
                websocket: WebSocketProxy::new(
                    Arc::clone(&route),
                    &config.websocket,
                    connect_timeout,
                    sessions.clone(),
                ),
            };
            services.insert(route.key().clone(), mounted);
        }

        let service_count = services.len();
        let state = AppState {
            services: Arc::new(services),
        };
        let router = Self::build_router(&config, state);

        Ok(Self {
            router,
            config,
            sessions,
            service_count,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let scheme = if config.listener.tls.is_some() { "https" } else { "http" };

        Router::new()
            .route("/ZLUX/plugins/{*path}", any(dispatch))
            .with_state(state)
            .layer(Extension(ListenerScheme(scheme)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The router, for serving it some other way (tests, embedding).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn service_count(&self) -> usize {
        self.service_count
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let app = self.router.into_make_service();

        match &self.config.listener.tls {
            None => {
                tracing::info!(address = %addr, services = self.service_count, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("HTTP server draining");
                    })
                    .await?;
            }
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, services = self.service_count, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                tokio::spawn({
                    let handle = handle.clone();
                    async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("HTTPS server draining");
                        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                    }
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve the mounted service and hand the request to the matching proxy.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request.request_id().to_string();
    let (mut parts, body) = request.into_parts();

    let Some(matched) = state.services.match_uri(&parts.uri) else {
        tracing::debug!(request_id = %request_id, path = %parts.uri.path(), "No service mounted at path");
        return (StatusCode::NOT_FOUND, "No matching service").into_response();
    };
    let service = matched.service.clone();
    let url = matched.url;

    tracing::debug!(
        request_id = %request_id,
        service = %matched.key,
        version = %matched.version,
        url = %url,
        "Dispatching request"
    );

    let origin = ClientOrigin::from_parts(&parts);
    parts.uri = match url.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::debug!(request_id = %request_id, url = %url, error = %e, "Service URL is invalid");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Ok(upgrade) = WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        let relay = service.websocket;
        return upgrade
            .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| async move { relay.relay(socket, parts).await });
    }

    service.http.forward(Request::from_parts(parts, body), &origin).await
}
