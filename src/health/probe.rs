//! Backend reachability probing.
//!
//! # Responsibilities
//! - Wait for a backend to accept TCP connections
//! - Retry while the backend refuses connections, within a deadline
//! - Give up immediately on any other connect error
//!
//! # Design Decisions
//! - Fixed retry interval, no exponential backoff
//! - Each attempt spends one interval of the budget, however long it took
//! - The probe socket is closed as soon as it connects; nothing is sent

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use crate::observability::metrics;

/// Deadline used when the caller does not pass one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
/// Wait between attempts while the backend refuses connections.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const LOOPBACK_DEFAULT: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("communication with {host}:{port} failed: {source}{}", loopback_note(.host))]
    Unreachable {
        host: String,
        port: u16,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeError::Unreachable { attempts, .. } => *attempts,
        }
    }
}

fn loopback_note(host: &str) -> &'static str {
    if host == LOOPBACK_DEFAULT {
        " (no backend host was configured and it defaulted to 127.0.0.1; \
         check that the backend is running or configure its host and port)"
    } else {
        ""
    }
}

/// Resolve once `host:port` accepts a TCP connection, or fail after
/// `deadline` (default 30s).
pub async fn check_proxied_host(host: &str, port: u16, deadline: Option<Duration>) -> Result<(), ProbeError> {
    probe(host, port, deadline.unwrap_or(DEFAULT_DEADLINE), RECONNECT_DELAY).await
}

/// Probe with an explicit retry interval.
pub async fn probe(host: &str, port: u16, deadline: Duration, backoff: Duration) -> Result<(), ProbeError> {
    let mut remaining = deadline;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let attempt_timeout = remaining.max(backoff);
        let result = match tokio::time::timeout(attempt_timeout, TcpStream::connect((host, port))).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };
        remaining = remaining.saturating_sub(backoff);

        match result {
            Ok(stream) => {
                drop(stream);
                metrics::record_probe_attempt("connected");
                tracing::debug!(host = %host, port, attempts, "Backend reachable");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && !remaining.is_zero() => {
                metrics::record_probe_attempt("refused");
                tracing::warn!(
                    host = %host,
                    port,
                    retry_in = ?backoff,
                    "Failed to connect to the backend, will attempt again"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                metrics::record_probe_attempt("failed");
                tracing::warn!(host = %host, port, attempts, error = %e, "Failed to reach backend");
                if host == LOOPBACK_DEFAULT {
                    tracing::warn!("Backend host was not configured and defaulted to 127.0.0.1");
                }
                return Err(ProbeError::Unreachable {
                    host: host.to_string(),
                    port,
                    attempts,
                    source: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    /// A loopback port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn succeeds_immediately_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        check_proxied_host("127.0.0.1", port, None).await.unwrap();
    }

    #[tokio::test]
    async fn retries_until_backend_starts() {
        let port = closed_port().await;
        let backend = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            // Keep accepting until the probe got through.
            let _ = listener.accept().await;
        });

        probe("127.0.0.1", port, Duration::from_secs(5), Duration::from_millis(50))
            .await
            .unwrap();
        backend.await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_once_budget_is_spent() {
        let port = closed_port().await;
        let start = Instant::now();

        let err = probe("127.0.0.1", port, Duration::from_millis(200), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 4);
        assert!(start.elapsed() >= Duration::from_millis(150));
        let message = err.to_string();
        assert!(message.contains(&format!("127.0.0.1:{port}")));
        assert!(message.contains("defaulted to 127.0.0.1"));
    }

    #[test]
    fn note_only_for_loopback_default() {
        assert_eq!(loopback_note("backend.internal"), "");
        assert!(!loopback_note("127.0.0.1").is_empty());
    }
}
