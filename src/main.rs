//! serve-guard
//!
//! Runs the resource guard standalone: rebalancing, memory watch and the
//! Prometheus endpoint, with no request pipeline attached.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────┐
//!                 │                   SERVE GUARD                    │
//!                 │                                                  │
//!   request ──────┼─▶ admission ──▶ grant / deny (backpressure)      │
//!                 │      ▲                                           │
//!                 │      │ rebalance + expire (periodic)             │
//!                 │   resources (sysinfo sampler, GPU probe)         │
//!                 │      │                                           │
//!                 │      ▼                                           │
//!                 │   memory ──▶ tiered optimization chain           │
//!                 │      ▲                                           │
//!   failure ──────┼─▶ recovery ──▶ fallback strategies ──▶ response  │
//!                 │                                                  │
//!                 │   config · observability · lifecycle             │
//!                 └──────────────────────────────────────────────────┘
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use serve_guard::config::{load_config, ConfigError, GuardConfig};
use serve_guard::lifecycle::wait_for_termination;
use serve_guard::memory::MemoryStatus;
use serve_guard::observability::{logging, metrics};
use serve_guard::resources::{ResourceSampler, SystemSampler};
use serve_guard::GuardContext;

#[derive(Parser)]
#[command(name = "serve-guard")]
#[command(about = "Resource admission, memory pressure and recovery guard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the guard's background loops until interrupted
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print one resource snapshot and memory status as JSON
    Sample {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a config file and print the effective configuration
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load(path: Option<&PathBuf>) -> Result<GuardConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(GuardConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Sample { config } => sample(config),
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(path.as_ref())?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        max_concurrent = config.limits.max_concurrent_allocations,
        rebalance_interval_secs = config.rebalance.interval_secs,
        proactive_memory = config.memory.proactive,
        fallback_models = config.recovery.models.len(),
        "serve-guard v{} starting",
        env!("CARGO_PKG_VERSION")
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

    let guard = GuardContext::builder(config).build()?;
    guard.start();

    wait_for_termination().await;

    guard.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn sample(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(path.as_ref())?;
    let sampler = SystemSampler::new();

    let snapshot = sampler.sample();
    let memory = MemoryStatus::from_reading(sampler.sample_memory(), &config.memory.thresholds);

    let report = serde_json::json!({
        "resources": snapshot,
        "memory": memory,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path)?;
    println!("# {} is valid\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
