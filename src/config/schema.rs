//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway data-plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Proxied services, one backend destination each.
    pub services: Vec<ServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// WebSocket close-code policy.
    pub websocket: WebSocketConfig,

    /// Backend reachability probe settings.
    pub probe: ProbeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8543").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8543".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// One proxied service and the backend it forwards to.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Plugin that owns the service. Used in mount paths and redirects.
    pub plugin_id: String,

    /// Service name within the plugin.
    pub service_name: String,

    /// Backend host. Required.
    pub host: Option<String>,

    /// Backend port. Required.
    pub port: Option<u16>,

    /// Prepended verbatim to every outbound path.
    pub url_prefix: String,

    /// Talk to the backend over TLS (`https` / `wss`).
    pub https: bool,

    /// Accept any backend certificate.
    pub allow_invalid_tls: bool,

    /// Trust and client-certificate overrides for TLS backends.
    pub tls: Option<UpstreamTlsConfig>,

    /// Inbound header names never forwarded to the backend.
    pub headers_to_remove: Vec<String>,

    /// Wait for the backend to accept TCP connections before serving.
    pub probe_on_startup: bool,
}

/// Outbound TLS overrides for a service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    /// Extra CA bundle (PEM) trusted in addition to the system roots.
    pub ca_path: Option<String>,

    /// Client certificate chain (PEM).
    pub client_cert_path: Option<String>,

    /// Client private key (PEM).
    pub client_key_path: Option<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed to produce response headers, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 60,
        }
    }
}

/// WebSocket close-code policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Lowest close code a peer may have propagated verbatim.
    pub close_code_minimum: u16,

    /// Code sent in place of a received code below the minimum.
    pub close_by_proxy: u16,

    /// Code sent when the relay itself fails.
    pub close_internal_error: u16,

    /// Suffix the outer router appends to WebSocket paths.
    pub handshake_marker: String,

    /// Limit on opening the backend session (connect, TLS and upgrade).
    pub handshake_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            close_code_minimum: 3000,
            close_by_proxy: 4998,
            close_internal_error: 4999,
            handshake_marker: ".websocket".to_string(),
            handshake_timeout_secs: 30,
        }
    }
}

/// Reachability probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Total time budget per backend, in seconds.
    pub deadline_secs: u64,

    /// Fixed wait between refused attempts, in seconds.
    pub backoff_secs: u64,

    /// Abort startup when a probed backend never becomes reachable.
    pub fail_on_unreachable: bool,
}

impl ProbeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30,
            backoff_secs: 5,
            fail_on_unreachable: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
