//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Every service has a destination host and port
//! - Plugin/service pairs are unique
//! - WebSocket close codes are usable on the wire
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GatewayConfig, ServiceConfig, WebSocketConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted location of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        validate_service(i, service, &mut errors);
        if !seen.insert((service.plugin_id.as_str(), service.service_name.as_str())) {
            errors.push(ValidationError::new(
                format!("services[{i}]"),
                format!(
                    "duplicate service {}:{}",
                    service.plugin_id, service.service_name
                ),
            ));
        }
    }

    validate_websocket(&config.websocket, &mut errors);

    if config.probe.backoff_secs == 0 {
        errors.push(ValidationError::new("probe.backoff_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(index: usize, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    let at = |field: &str| format!("services[{index}].{field}");

    if service.plugin_id.is_empty() {
        errors.push(ValidationError::new(at("plugin_id"), "must not be empty"));
    }
    if service.service_name.is_empty() {
        errors.push(ValidationError::new(at("service_name"), "must not be empty"));
    }
    if service.host.as_deref().map_or(true, str::is_empty) {
        errors.push(ValidationError::new(at("host"), "destination host is required"));
    }
    match service.port {
        None => errors.push(ValidationError::new(at("port"), "destination port is required")),
        Some(0) => errors.push(ValidationError::new(at("port"), "must be > 0")),
        Some(_) => {}
    }
}

fn validate_websocket(ws: &WebSocketConfig, errors: &mut Vec<ValidationError>) {
    for (field, code) in [
        ("websocket.close_code_minimum", ws.close_code_minimum),
        ("websocket.close_by_proxy", ws.close_by_proxy),
        ("websocket.close_internal_error", ws.close_internal_error),
    ] {
        if !(1000..=4999).contains(&code) {
            errors.push(ValidationError::new(field, "must be within 1000..=4999"));
        }
    }
    if ws.close_by_proxy < ws.close_code_minimum {
        errors.push(ValidationError::new(
            "websocket.close_by_proxy",
            "must not be below close_code_minimum",
        ));
    }
    if ws.close_internal_error < ws.close_code_minimum {
        errors.push(ValidationError::new(
            "websocket.close_internal_error",
            "must not be below close_code_minimum",
        ));
    }
    if ws.handshake_marker.is_empty() {
        errors.push(ValidationError::new(
            "websocket.handshake_marker",
            "must not be empty",
        ));
    }
    if ws.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new("websocket.handshake_timeout_secs", "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(plugin: &str, name: &str) -> ServiceConfig {
        ServiceConfig {
            plugin_id: plugin.into(),
            service_name: name.into(),
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn missing_destination_is_reported() {
        let mut config = GatewayConfig::default();
        let mut svc = service("p", "s");
        svc.host = None;
        svc.port = Some(0);
        config.services.push(svc);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["services[0].host", "services[0].port"]);
    }

    #[test]
    fn duplicate_services_are_reported() {
        let mut config = GatewayConfig::default();
        config.services.push(service("p", "s"));
        config.services.push(service("p", "s"));
        config.services.push(service("p", "t"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate"));
    }

    #[test]
    fn close_codes_must_sit_above_minimum() {
        let mut config = GatewayConfig::default();
        config.websocket.close_by_proxy = 1001;
        config.websocket.close_internal_error = 6000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn zero_handshake_timeout_is_rejected() {
        let mut config = GatewayConfig::default();
        config.websocket.handshake_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "websocket.handshake_timeout_secs");
    }
}
