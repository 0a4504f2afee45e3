// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Rumor Node
//!
//! Entry point for the `rumor-node` binary. Parses CLI arguments,
//! initializes logging and metrics, then serves the gossip protocol over
//! stdin/stdout until input closes, a signal arrives, or the gossip engine
//! reports a fatal error.
//!
//! - no subcommand: run the node
//! - `version`: print build version information

mod cli;
mod logging;
mod metrics;
mod runtime;
mod transport;

use anyhow::Result;
use clap::Parser;
use tokio::signal;

use rumor_protocol::GossipMetrics;

use cli::{Commands, RumorNodeCli};
use runtime::Runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RumorNodeCli::parse();

    match cli.command {
        Some(Commands::Version) => {
            print_version();
            Ok(())
        }
        None => run_node(cli.run).await,
    }
}

/// Runs the node on the process's standard streams.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging("rumor_node=info,rumor_protocol=info", args.log_format);

    let config = args.gossip_config();
    tracing::info!(
        first_attempt_timeout_ms = config.first_attempt_timeout_ms,
        retry_timeout_ms = config.retry_timeout_ms,
        metrics_port = ?args.metrics_port,
        "starting rumor-node"
    );

    let gossip_metrics = GossipMetrics::new();

    let metrics_server = args.metrics_port.map(|port| {
        let gossip_metrics = gossip_metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(port, gossip_metrics).await {
                tracing::error!("metrics server error: {:#}", e);
            }
        })
    });

    let runtime = Runtime::new(config, gossip_metrics);
    let result = tokio::select! {
        res = runtime.run(tokio::io::stdin(), tokio::io::stdout()) => res,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    if let Some(server) = metrics_server {
        server.abort();
    }
    match &result {
        Ok(()) => tracing::info!("rumor-node stopped"),
        Err(e) => tracing::error!("rumor-node failed: {:#}", e),
    }
    result
}

/// Prints version information to stdout.
fn print_version() {
    println!("rumor-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
