//! HTTP forward proxy.
//!
//! # Responsibilities
//! - Translate each inbound request into one call to the route's backend
//! - Stream the request body out and the response body back
//! - Run the route's authorization and header hooks
//! - Rewrite backend redirects onto the gateway
//!
//! # Design Decisions
//! - Single attempt per call: a failed backend call is a 500, retry is the caller's business
//! - The deadline covers the wait for response headers only; request and
//!   response bodies stream for as long as they take
//! - Only POST, PUT and PATCH carry a body to the backend
//! - One pooled client per route, built at registration with the route's TLS settings

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, Request};
use axum::response::Response;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};

use crate::http::response::{rewrite_redirect, upstream_failure, ClientOrigin};
use crate::net::connect::ipv4_http_connector;
use crate::net::tls;
use crate::observability::metrics;
use crate::routing::{translate, Route, RouteError};

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Forwards HTTP requests for one route.
#[derive(Clone)]
pub struct HttpProxy {
    route: Arc<Route>,
    client: UpstreamClient,
    request_timeout: Duration,
}

impl HttpProxy {
    pub fn new(
        route: Arc<Route>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RouteError> {
        let tls_config = match route.tls() {
            Some(config) => config.as_ref().clone(),
            None => plain_client_config().map_err(|source| RouteError::Tls {
                plugin_id: route.plugin_id().to_string(),
                service_name: route.service_name().to_string(),
                source: source.into(),
            })?,
        };

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(ipv4_http_connector(connect_timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            route,
            client,
            request_timeout,
        })
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// Perform one proxied call.
    ///
    /// `request` carries the inbound URL (path + query) as seen by this
    /// service, `origin` how the client addressed the gateway.
    pub async fn forward(&self, request: Request<Body>, origin: &ClientOrigin) -> Response {
        let start = Instant::now();
        let (inbound, body) = request.into_parts();
        let url = inbound
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        tracing::debug!(
            scheme = %origin.scheme,
            host = %origin.host,
            url = %url,
            "Proxying request"
        );

        let mut outbound = translate(&inbound.method, url, &inbound.headers, &self.route);

        if let Some(auth) = self.route.authorization() {
            tracing::debug!("Applying authorization hook");
            auth.inject(&inbound, &mut outbound);
        } else {
            tracing::debug!("No authorization hook");
        }

        tracing::debug!(
            host = %outbound.host,
            port = outbound.port,
            path = %outbound.path,
            "Proxy request to backend"
        );

        let uri = match outbound.uri(self.route.http_scheme()) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(path = %outbound.path, error = %e, "Outbound URI is invalid");
                return self.fail(&inbound.method, start);
            }
        };

        let body = if carries_body(&inbound.method) {
            tracing::debug!("Forwarding request body to backend");
            body
        } else {
            Body::empty()
        };

        let mut upstream = Request::new(body);
        *upstream.method_mut() = outbound.method;
        *upstream.uri_mut() = uri;
        *upstream.headers_mut() = outbound.headers;

        let result = match tokio::time::timeout(self.request_timeout, self.client.request(upstream)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no response within {:?}", self.request_timeout)),
        };

        match result {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Backend responded");
                metrics::record_request(
                    &self.route.key().to_string(),
                    inbound.method.as_str(),
                    response.status().as_u16(),
                    start,
                );
                self.respond(response, &inbound, origin)
            }
            Err(e) => {
                tracing::warn!(
                    host = %outbound.host,
                    port = outbound.port,
                    path = %outbound.path,
                    error = %e,
                    "Service call to backend failed"
                );
                metrics::record_upstream_error(&self.route.key().to_string());
                self.fail(&inbound.method, start)
            }
        }
    }

    fn respond(&self, response: Response<Incoming>, inbound: &Parts, origin: &ClientOrigin) -> Response {
        let (mut parts, body) = response.into_parts();

        let headers = std::mem::take(&mut parts.headers);
        parts.headers = match self.route.header_processor() {
            Some(processor) => processor.process(inbound, headers),
            None => headers,
        };
        rewrite_redirect(&mut parts.headers, origin, &self.route);

        Response::from_parts(parts, Body::new(body))
    }

    fn fail(&self, method: &Method, start: Instant) -> Response {
        let response = upstream_failure();
        metrics::record_request(
            &self.route.key().to_string(),
            method.as_str(),
            response.status().as_u16(),
            start,
        );
        response
    }
}

/// Methods whose inbound body is streamed to the backend.
pub fn carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// TLS settings for the connector of a plain-HTTP route. Never used for a
/// handshake because such routes only build `http://` URIs.
fn plain_client_config() -> Result<ClientConfig, rustls::Error> {
    Ok(ClientConfig::builder_with_provider(tls::provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth())
}
