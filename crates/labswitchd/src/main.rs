//! labswitchd - managed switch simulator daemon
//!
//! Entry point: loads configuration and the durable snapshot, seeds the lab
//! when starting empty, runs the simulators until SIGINT/SIGTERM, and shuts
//! down with a final state save.

use anyhow::Context;
use clap::Parser;
use labswitchd::{ops::SwitchSpec, SimdConfig, Simulator};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "labswitchd", about = "Managed switch simulator for virtual lab environments")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the durable state file location
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Number of switches to seed when starting with an empty lab
    #[arg(long, default_value_t = 1)]
    seed_switches: usize,
}

/// Initializes structured logging; `RUST_LOG` overrides the default level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    info!("--- starting labswitchd ---");

    let mut config = match &args.config {
        Some(path) => SimdConfig::load(path).context("loading configuration")?,
        None => SimdConfig::default(),
    };
    if let Some(data_file) = args.data_file {
        config.data_file = data_file;
    }

    let mut simulator = Simulator::new(config).await.context("building simulator")?;
    seed_lab(&simulator, args.seed_switches);
    simulator.start().context("starting simulator")?;

    wait_for_shutdown().await;
    info!("shutdown signal received");

    simulator.shutdown().await;
    Ok(())
}

/// Provisions the initial switches when no saved state existed.
fn seed_lab(simulator: &Simulator, count: usize) {
    let store = simulator.store();
    if !store.read().state.switches.is_empty() {
        return;
    }
    for i in 1..=count {
        let id = format!("SW{:03}", i);
        match store.create_switch(SwitchSpec {
            id: id.clone(),
            ..SwitchSpec::default()
        }) {
            Ok(_) => info!(switch = %id, "seeded switch"),
            Err(e) => warn!(switch = %id, error = %e, "seeding failed"),
        }
    }
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
