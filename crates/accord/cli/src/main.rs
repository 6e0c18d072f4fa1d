//! Accord host
//!
//! Loads configuration, initialises logging, opens the configured store and
//! replays negotiation scripts against the engine.

use accord_engine::AccordEngine;
use accord_storage::memory::{InMemoryDirectory, InMemoryNegotiationStore};
use accord_storage::NegotiationStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod script;

use config::{AccordConfig, StorageConfig};
use script::{Replayer, Script};

/// Accord CLI
#[derive(Parser)]
#[command(name = "accord")]
#[command(about = "Accord - multi-party payment split negotiation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ACCORD_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configured level)
    #[arg(long, env = "ACCORD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ACCORD_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a negotiation script and print one JSON report per step
    Replay {
        /// Script file (JSON)
        #[arg(short, long)]
        script: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AccordConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Replay { script } => replay(&config, &script).await,
    }
}

async fn replay(config: &AccordConfig, path: &Path) -> anyhow::Result<()> {
    let script = Script::from_file(path)?;

    let directory = Arc::new(InMemoryDirectory::new());
    script.seed(&directory)?;

    let store = open_store(&config.storage).await?;
    let engine = AccordEngine::new(store, directory, config.policy.clone());

    info!(script = %path.display(), steps = script.steps.len(), "Replaying script");
    let mut replayer = Replayer::new(engine);
    for report in replayer.run(script.steps).await? {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

async fn open_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn NegotiationStore>> {
    match storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(InMemoryNegotiationStore::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = accord_storage::postgres::PostgresNegotiationStore::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await
            .context("failed to open postgres storage")?;
            info!(max_connections, "Using postgres storage");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => {
            anyhow::bail!("postgres storage requires the `postgres` feature")
        }
    }
}
