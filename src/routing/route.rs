//! Validated, immutable per-service route.
//!
//! Built once when a service is registered and shared read-only (via `Arc`)
//! by every request and WebSocket session for that service.

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use rustls::ClientConfig;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::net::tls::{self, TlsError};
use crate::routing::translate::OutboundRequest;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(
        "proxy ({plugin_id}:{service_name}) setup failed: host and port for the proxy destination are required"
    )]
    MissingDestination {
        plugin_id: String,
        service_name: String,
    },

    #[error("proxy ({plugin_id}:{service_name}) has an invalid destination {authority:?}")]
    InvalidDestination {
        plugin_id: String,
        service_name: String,
        authority: String,
    },

    #[error("proxy ({plugin_id}:{service_name}) TLS setup failed: {source}")]
    Tls {
        plugin_id: String,
        service_name: String,
        #[source]
        source: TlsError,
    },
}

/// Rewrites backend response headers before they reach the client.
pub trait HeaderProcessor: Send + Sync {
    fn process(&self, inbound: &Parts, headers: HeaderMap) -> HeaderMap;
}

impl<F> HeaderProcessor for F
where
    F: Fn(&Parts, HeaderMap) -> HeaderMap + Send + Sync,
{
    fn process(&self, inbound: &Parts, headers: HeaderMap) -> HeaderMap {
        self(inbound, headers)
    }
}

/// Adds credentials to an outbound request.
pub trait AuthorizationInjector: Send + Sync {
    fn inject(&self, inbound: &Parts, outbound: &mut OutboundRequest);
}

impl<F> AuthorizationInjector for F
where
    F: Fn(&Parts, &mut OutboundRequest) + Send + Sync,
{
    fn inject(&self, inbound: &Parts, outbound: &mut OutboundRequest) {
        self(inbound, outbound)
    }
}

/// Identity of a proxied service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub plugin_id: String,
    pub service_name: String,
}

impl ServiceKey {
    pub fn new(plugin_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            service_name: service_name.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin_id, self.service_name)
    }
}

/// One backend destination and how to proxy to it.
#[derive(Clone)]
pub struct Route {
    key: ServiceKey,
    host: String,
    port: u16,
    authority: HeaderValue,
    url_prefix: String,
    https: bool,
    allow_invalid_tls: bool,
    tls: Option<Arc<ClientConfig>>,
    headers_to_remove: Vec<HeaderName>,
    header_processor: Option<Arc<dyn HeaderProcessor>>,
    authorization: Option<Arc<dyn AuthorizationInjector>>,
}

impl Route {
    /// Validate a service entry. Fails when the destination is missing.
    pub fn new(config: &ServiceConfig) -> Result<Self, RouteError> {
        let key = ServiceKey::new(&config.plugin_id, &config.service_name);

        let (host, port) = match (config.host.as_deref(), config.port) {
            (Some(host), Some(port)) if !host.is_empty() && port != 0 => (host.to_string(), port),
            _ => {
                return Err(RouteError::MissingDestination {
                    plugin_id: key.plugin_id,
                    service_name: key.service_name,
                })
            }
        };

        let authority = format!("{host}:{port}");
        let authority = HeaderValue::from_str(&authority).map_err(|_| RouteError::InvalidDestination {
            plugin_id: key.plugin_id.clone(),
            service_name: key.service_name.clone(),
            authority,
        })?;

        let tls = if config.https {
            let client = tls::upstream_client_config(config.allow_invalid_tls, config.tls.as_ref())
                .map_err(|source| RouteError::Tls {
                    plugin_id: key.plugin_id.clone(),
                    service_name: key.service_name.clone(),
                    source,
                })?;
            Some(client)
        } else {
            None
        };

        // Names that are not valid header names can never match an inbound header.
        let headers_to_remove = config
            .headers_to_remove
            .iter()
            .filter_map(|name| HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).ok())
            .collect();

        Ok(Self {
            key,
            host,
            port,
            authority,
            url_prefix: config.url_prefix.clone(),
            https: config.https,
            allow_invalid_tls: config.allow_invalid_tls,
            tls,
            headers_to_remove,
            header_processor: None,
            authorization: None,
        })
    }

    pub fn with_header_processor(mut self, processor: Arc<dyn HeaderProcessor>) -> Self {
        self.header_processor = Some(processor);
        self
    }

    pub fn with_authorization(mut self, injector: Arc<dyn AuthorizationInjector>) -> Self {
        self.authorization = Some(injector);
        self
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn plugin_id(&self) -> &str {
        &self.key.plugin_id
    }

    pub fn service_name(&self) -> &str {
        &self.key.service_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` as sent in rewritten `host`/`origin` headers.
    pub fn authority(&self) -> &HeaderValue {
        &self.authority
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Client TLS settings; `Some` exactly when the route is encrypted.
    pub fn tls(&self) -> Option<&Arc<ClientConfig>> {
        self.tls.as_ref()
    }

    pub fn http_scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    pub fn ws_scheme(&self) -> &'static str {
        if self.https {
            "wss"
        } else {
            "ws"
        }
    }

    pub fn removes(&self, name: &HeaderName) -> bool {
        self.headers_to_remove.contains(name)
    }

    pub fn header_processor(&self) -> Option<&Arc<dyn HeaderProcessor>> {
        self.header_processor.as_ref()
    }

    pub fn authorization(&self) -> Option<&Arc<dyn AuthorizationInjector>> {
        self.authorization.as_ref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("key", &self.key)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("url_prefix", &self.url_prefix)
            .field("https", &self.https)
            .field("allow_invalid_tls", &self.allow_invalid_tls)
            .field("headers_to_remove", &self.headers_to_remove)
            .field("header_processor", &self.header_processor.is_some())
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}
