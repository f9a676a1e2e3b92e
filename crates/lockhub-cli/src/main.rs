//! `lockhub`: run a kiosk node or the fleet coordinator.
//!
//! ```text
//! lockhub node --config /etc/lockhub/node.toml
//! lockhub coordinator --config /etc/lockhub/coordinator.toml --log-level debug
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lockhub_network::{Coordinator, FleetServer};
use lockhub_node::{Config, KioskNode};
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Locker fleet node and coordinator
#[derive(Parser, Debug)]
#[command(name = "lockhub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "lockhub=info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a kiosk node: relay bus, locker state and fleet loops
    Node {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the fleet coordinator: heartbeat registry and command queue
    Coordinator {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting lockhub");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match cli.command {
        Command::Node { config } => run_node(&config, cancel).await,
        Command::Coordinator { config } => run_coordinator(&config, cancel).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

async fn run_node(path: &Path, cancel: CancellationToken) -> Result<()> {
    let config = load_config(path)?;
    let node = KioskNode::start(&config)
        .await
        .context("Failed to start kiosk node")?;

    info!(
        kiosk_id = %node.kiosk_id(),
        coordinator = %config.node.coordinator_addr,
        "Kiosk node started"
    );
    node.run(cancel).await.context("Kiosk node stopped with an error")?;
    Ok(())
}

async fn run_coordinator(path: &Path, cancel: CancellationToken) -> Result<()> {
    let config = load_config(path)?;
    let server_config = config
        .coordinator
        .server_config()
        .context("Invalid coordinator settings")?;

    let coordinator = Arc::new(Mutex::new(Coordinator::new(
        config.coordinator.coordinator_config(),
    )));
    let server = FleetServer::bind(server_config, coordinator)
        .await
        .context("Failed to start fleet coordinator")?;

    server
        .run(cancel)
        .await
        .context("Fleet coordinator stopped with an error")?;
    info!("Fleet coordinator stopped");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }

    info!("Initiating graceful shutdown");
    cancel.cancel();
}
