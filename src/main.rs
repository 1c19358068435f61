use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use evm_log_etl::metrics::Metrics;
use evm_log_etl::pipeline::Pipeline;
use evm_log_etl::utils::load_config;

#[derive(Parser, Debug)]
#[command(name = "evm-log-etl", version, about = "Decode exported EVM event logs into per-event CSV tables")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read NDJSON exports into the raw log table(s)
    Ingest,
    /// Tag every raw log row with its event name
    Classify,
    /// Decode log tables into one CSV per event
    Decode,
    /// Ingest and decode in one go
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config(&cli.config) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(anyhow!(e));
        }
    };

    let contract_name = config.contract_name.clone();
    let metrics_config = config.metrics.clone();

    // Initialize optional metrics
    let metrics = if metrics_config.enabled {
        Some(Arc::new(Metrics::new(contract_name.clone())?))
    } else {
        info!("Metrics are disabled");
        None
    };

    // Start metrics server if metrics are enabled
    if let Some(metrics_instance) = &metrics {
        metrics_instance
            .start_metrics_server(&metrics_config.address, metrics_config.port)
            .await?;
    }

    let mut pipeline = Pipeline::new(config)?;
    if let Some(metrics_instance) = metrics {
        pipeline = pipeline.with_metrics(metrics_instance);
    }

    println!();
    info!("========================== STARTING {:?} ==========================", cli.command);
    info!("Contract: {}", contract_name);

    let report = match cli.command {
        Command::Ingest => pipeline.ingest().await,
        Command::Classify => pipeline.classify().await,
        Command::Decode => pipeline.decode().await,
        Command::Run => pipeline.run().await,
    };

    match report {
        Ok(report) => {
            for path in &report.outputs {
                info!("Output: {}", path.display());
            }
            info!("Done: {} rows written", report.stats.total_decoded());
            Ok(())
        }
        Err(e) => {
            error!("{:?} failed: {:#}", cli.command, e);
            Err(e)
        }
    }
}
