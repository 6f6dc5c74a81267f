//! Gateway data-plane proxy.
//!
//! Serves every configured service under
//! `/ZLUX/plugins/{plugin}/services/{service}/{version}/`, forwarding HTTP
//! calls and relaying WebSocket sessions to the service's backend.
//!
//! # Startup Order
//! ```text
//! CLI → config (load + validate) → logging → metrics → backend probes
//!     → routes → bind listener → serve until SIGINT/SIGTERM
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_proxy::config::{self, GatewayConfig};
use gateway_proxy::lifecycle::{probe_backends, spawn_signal_listener, Shutdown};
use gateway_proxy::net::tls;
use gateway_proxy::observability::{logging, metrics};
use gateway_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "gateway-proxy", version, about = "Gateway HTTP and WebSocket proxy")]
struct Cli {
    /// Configuration file (TOML). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => GatewayConfig::default(),
    };

    if cli.check {
        println!("configuration OK: {} service(s)", config.services.len());
        return Ok(());
    }

    tls::install_default_provider();
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "gateway-proxy starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        tls = config.listener.tls.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    probe_backends(&config).await?;

    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signals = spawn_signal_listener(shutdown.clone());

    server.run(listener, shutdown.subscribe()).await?;
    signals.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
