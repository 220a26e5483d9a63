//! Journey planning gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   JOURNEY GATEWAY                    │
//!                    │                                                      │
//!  FanOutRequest     │  ┌────────────┐   ┌──────────────┐   ┌────────────┐  │
//!  ──────────────────┼─▶│ StatsLayer │──▶│ Orchestrator │──▶│ TaskScope  │  │
//!                    │  └────────────┘   └──────┬───────┘   └─────┬──────┘  │
//!                    │                          │                 │         │
//!                    │               ┌──────────┴───┐     ┌───────▼──────┐  │
//!                    │               │ ObjectCache  │     │ Capability   │──┼──▶ instance
//!                    │               │ memory/redis │     │ Proxy + CB   │  │    engines
//!                    │               └──────▲───────┘     └───────▲──────┘  │
//!                    │                      │ evict               │ resolve │
//!                    │               ┌──────┴──────────┐   ┌──────┴──────┐  │
//!  pub/sub, files,   │               │  Invalidation   │──▶│  Instance   │  │
//!  metadata polls ───┼──────────────▶│   Listener      │   │  Registry   │  │
//!                    │               └─────────────────┘   └─────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tower::ServiceExt;

use journey_gateway::config::{load_config, load_instances_dir, GatewayConfig};
use journey_gateway::observability::{init_logging, init_metrics};
use journey_gateway::{FanOutRequest, Gateway};

#[derive(Parser)]
#[command(name = "journey-gateway")]
#[command(about = "Fan-out gateway in front of regional journey planners", long_about = None)]
struct Cli {
    /// Gateway configuration file
    #[arg(short, long, default_value = "/etc/journey-gateway/gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway and its invalidation consumers (default)
    Serve,
    /// Validate the configuration and every instance file, then exit
    CheckConfig,
    /// Execute one fan-out request read from a JSON file and print the aggregate
    Query {
        /// JSON-encoded fan-out request
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Query { request } => query(config, &request).await,
    }
}

async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "journey-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::build(config).await?;
    let background = gateway.spawn_background();
    tracing::info!(
        instances = gateway.registry().len(),
        cache = gateway.cache().provider_name(),
        "Gateway ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    gateway.shutdown().trigger();
    background.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn check_config(config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Skipped instance files are reported through the log.
    init_logging(&config.observability)?;
    let dir = PathBuf::from(&config.registry.instances_dir);
    let loaded = load_instances_dir(&dir, &config.registry.instance_file_extension)?;
    println!("configuration OK, {} instance(s) in {}", loaded.len(), dir.display());
    for (path, instance) in loaded {
        println!("  {:<20} {}", instance.id, path.display());
    }
    Ok(())
}

async fn query(config: GatewayConfig, request: &Path) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&config.observability)?;

    let request: FanOutRequest = serde_json::from_str(&std::fs::read_to_string(request)?)?;
    let gateway = Gateway::build(config).await?;
    let aggregate = gateway.service().oneshot(request).await?;
    println!("{}", serde_json::to_string_pretty(&aggregate)?);
    Ok(())
}
