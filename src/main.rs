//! Scale-to-zero HTTP interceptor.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ listener ──▶ request ID / trace / timeout ──▶ routing
//!                                                               │
//!                                              RoutingTarget    ▼
//!                                                     ┌──────────────────┐
//!                      endpoints cache ◀──────────────│ ForwardingHandler│
//!                        ▲        ▲                   │  placeholder?    │
//!         readiness prober    admin API               │  wait capacity   │
//!                                                     │  forward         │
//!                                                     └────────┬─────────┘
//!                                                              ▼
//!     Client ◀── + X-KEDA-HTTP-Cold-Start ◀── pooled transport ──▶ Backend
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use coldstart_proxy::config::resolve_config;
use coldstart_proxy::lifecycle::{spawn_signal_handler, Interceptor, Shutdown};
use coldstart_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "coldstart-proxy", version, about = "Scale-to-zero HTTP interceptor")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = resolve_config(args.config.as_deref())?;

    if args.check {
        println!("Configuration OK ({} routes)", config.routes.len());
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "coldstart-proxy starting");

    // Both rustls providers are compiled in; pick one for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let interceptor = Interceptor::build(config)?;
    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    interceptor.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
