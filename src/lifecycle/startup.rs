//! Startup orchestration.
//!
//! # Responsibilities
//! - Probe backends marked `probe_on_startup` before traffic is accepted
//! - Decide whether an unreachable backend aborts startup
//!
//! # Design Decisions
//! - Backends are probed concurrently, one probe per service
//! - With `fail_on_unreachable` unset an unreachable backend is only logged;
//!   its proxy answers 500 until the backend comes up

use futures_util::future::join_all;
use thiserror::Error;

use crate::config::{GatewayConfig, ServiceConfig};
use crate::health::{probe, ProbeError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{count} backend(s) unreachable at startup, first: {first}")]
    Unreachable { count: usize, first: ProbeError },
}

/// Probe every service that asks for it.
pub async fn probe_backends(config: &GatewayConfig) -> Result<(), StartupError> {
    let targets: Vec<&ServiceConfig> = config
        .services
        .iter()
        .filter(|service| service.probe_on_startup)
        .collect();

    if targets.is_empty() {
        return Ok(());
    }
    tracing::info!(count = targets.len(), "Probing backends");

    let deadline = config.probe.deadline();
    let backoff = config.probe.backoff();
    let results = join_all(targets.iter().map(|service| async move {
        // Validation guarantees both are present; a gap just skips the probe.
        let (Some(host), Some(port)) = (service.host.as_deref(), service.port) else {
            return Ok(());
        };
        let result = probe(host, port, deadline, backoff).await;
        match &result {
            Ok(()) => tracing::info!(
                plugin_id = %service.plugin_id,
                service_name = %service.service_name,
                host = %host,
                port,
                "Backend reachable"
            ),
            Err(e) => tracing::warn!(
                plugin_id = %service.plugin_id,
                service_name = %service.service_name,
                error = %e,
                "Backend unreachable"
            ),
        }
        result
    }))
    .await;

    let mut failures = results.into_iter().filter_map(Result::err);
    let Some(first) = failures.next() else {
        return Ok(());
    };
    let count = 1 + failures.count();

    if config.probe.fail_on_unreachable {
        Err(StartupError::Unreachable { count, first })
    } else {
        tracing::warn!(count, "Continuing with unreachable backends");
        Ok(())
    }
}
