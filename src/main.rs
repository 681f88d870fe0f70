//! Custodial DeFi Engine - custody, orchestration, and reconciliation daemon
//!
//! # WARNING
//! - The engine holds real user key material when run with a real master
//!   secret. Guard the configuration accordingly.
//! - Without a sponsor keypair the engine runs in simulation mode and never
//!   touches a cluster.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use defi_custody_engine::config::Config;
use defi_custody_engine::monitor::DepositMonitor;
use defi_custody_engine::network::{ExecutionMode, NetworkClient};
use defi_custody_engine::orchestrator::EngineContext;

/// Custodial DeFi Engine daemon
#[derive(Parser)]
#[command(name = "custody-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deposit reconciliation loop
    Monitor,

    /// Check connectivity and report the selected execution mode
    Health,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("defi_custody_engine=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Config => {
            println!("{}", config.masked_display());
            Ok(())
        }
        Commands::Health => health(config).await,
        Commands::Monitor => monitor(config).await,
    }
}

async fn health(config: Config) -> Result<()> {
    let engine = EngineContext::initialize(config)?;

    match engine.network.mode() {
        ExecutionMode::Simulated => {
            info!("execution mode: simulated, no cluster connectivity required");
        }
        ExecutionMode::Real => {
            // A pool lookup against a throwaway address exercises the RPC
            // round trip without side effects
            let probe = solana_sdk::pubkey::Pubkey::new_unique().to_string();
            match engine.network.fetch_pool(&probe).await {
                Ok(_) => info!("RPC endpoint reachable"),
                Err(e) => {
                    error!("RPC endpoint check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    println!("health: ok ({:?} mode)", engine.network.mode());
    Ok(())
}

async fn monitor(config: Config) -> Result<()> {
    let monitor_config = config.monitor.clone();
    let engine = EngineContext::initialize(config)?;

    let monitor = DepositMonitor::new(
        engine.network.clone(),
        engine.wallets.clone(),
        engine.ledger.clone(),
        monitor_config,
    );

    info!("deposit monitor running, press Ctrl+C to stop");
    tokio::select! {
        _ = monitor.run_loop() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
