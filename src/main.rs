//! Policy-enforcing HTTP forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     POLICY PROXY                      │
//!  Client request │  ┌────────┐   ┌──────────────┐   ┌──────────────┐    │
//!  ───────────────┼─▶│  http  │──▶│   pipeline   │──▶│   upstream   │────┼──▶ Origin
//!                 │  │ server │   │ request phase│   │  forwarder   │    │
//!                 │  └────────┘   └──────┬───────┘   └──────┬───────┘    │
//!                 │                      │ policy modules   │            │
//!  Client response│  ┌────────┐   ┌──────▼───────┐          │            │
//!  ◀──────────────┼──│ commit │◀──│   pipeline   │◀─────────┘            │
//!                 │  │or relay│   │response phase│                       │
//!                 │  └────────┘   └──────────────┘                       │
//!                 │       config store (JSON tables, admin API writes)   │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use policy_proxy::config::{load_config, ProxyConfig};
use policy_proxy::lifecycle::{build_interceptor, Shutdown};
use policy_proxy::observability::{init_logging, metrics};
use policy_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "policy-proxy")]
#[command(about = "HTTP forward proxy enforcing domain and content-type policies", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!("policy-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = %config.store.path.display(),
        admin_host = %config.admin.host,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let interceptor = build_interceptor(&config)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let server = HttpServer::new(config, interceptor);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
