//! portkeep daemon
//!
//! Reads the forwarding rules from a TOML file and keeps one SSH tunnel
//! per rule alive until the process is interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pk_core::config::{self, DEFAULT_CONFIG_PATH};
use pk_daemon::shutdown;
use pk_daemon::{SshTunnelFactory, SupervisorSet};

#[derive(Parser)]
#[command(name = "portkeep")]
#[command(about = "portkeep - keeps SSH port forwards alive")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    tracing::info!("Config: {}", config);
    if config.ports.is_empty() {
        tracing::warn!("No ports configured, nothing to forward");
    }

    let cancel = CancellationToken::new();

    let interrupts = shutdown::spawn_signal_listener();
    tokio::spawn(shutdown::run_coordinator(interrupts, cancel.clone()));

    let factory = SshTunnelFactory::from_config(&config);
    let supervisors = SupervisorSet::spawn(&config, factory, cancel);
    tracing::info!("Supervising {} forwarding rules", supervisors.len());

    supervisors.run().await;

    tracing::info!("portkeep stopped");
    Ok(())
}
