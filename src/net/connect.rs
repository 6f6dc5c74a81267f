//! Outbound TCP connections to backends.
//!
//! Backends are always reached over IPv4: a backend name can resolve to an
//! IPv6 address on some hosts while the backend only listens on IPv4.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use hyper_util::client::legacy::connect::HttpConnector;
use tokio::net::{lookup_host, TcpStream};

/// Resolve `host:port` keeping only IPv4 addresses.
pub async fn resolve_ipv4(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await?
        .filter(SocketAddr::is_ipv4)
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host}:{port} has no IPv4 address"),
        ));
    }
    Ok(addrs)
}

/// Connect to the first reachable IPv4 address of `host:port`.
pub async fn connect_ipv4(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in resolve_ipv4(host, port).await? {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => {
                last_err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ))
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address")))
}

/// HTTP connector restricted to IPv4 destinations.
///
/// Binding the IPv4 wildcard makes hyper-util drop IPv6 candidates from the
/// resolved address list.
pub fn ipv4_http_connector(connect_timeout: Duration) -> HttpConnector {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_local_address(Some(Ipv4Addr::UNSPECIFIED.into()));
    http.set_connect_timeout(Some(connect_timeout));
    http.set_nodelay(true);
    http
}
