//! # Chain Sync Main Entry Point
//!
//! `chain-sync serve` runs the operator API together with the scheduler,
//! executor and health loops; `chain-sync migrate` applies migrations.

use std::sync::Arc;

use anyhow::Context;
use chain_sync::{
    adapters::AdapterRegistry,
    config::{AppConfig, ConfigLoader},
    db::{init_pool, run_migrations},
    executor::SyncExecutor,
    health::HealthAggregator,
    scheduler::SyncScheduler,
    server::{AppState, run_server},
    telemetry::init_tracing,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "chain-sync", version, about = "Chain-wide data synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the operator API and run the sync loops (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            let db = init_pool(&config).await?;
            run_migrations(&db).await
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db = Arc::new(init_pool(&config).await?);
    run_migrations(&db).await?;

    let config = Arc::new(config);
    let adapters = Arc::new(AdapterRegistry::with_in_memory_fallback());
    let shutdown = CancellationToken::new();

    let scheduler = SyncScheduler::new(Arc::clone(&config), Arc::clone(&db));
    let executor = SyncExecutor::new(
        Arc::clone(&db),
        Arc::clone(&adapters),
        config.executor.clone(),
    );
    let aggregator = HealthAggregator::new(Arc::clone(&db), config.health.clone());

    let loops = vec![
        tokio::spawn(scheduler.run(shutdown.clone())),
        tokio::spawn(executor.run(shutdown.clone())),
        tokio::spawn(aggregator.run(shutdown.clone())),
    ];

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let state = AppState::new(Arc::clone(&config), Arc::clone(&db), adapters);
    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();

    for handle in loops {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Background loop exited with error"),
            Err(err) => tracing::error!(error = %err, "Background loop panicked"),
        }
    }

    served
}
