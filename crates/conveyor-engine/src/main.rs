//! Conveyor run-trigger daemon.

use anyhow::Context;
use clap::Parser;
use conveyor_db::{Database, PgAuthorizer, PgStore};
use conveyor_engine::{EngineConfig, StalledRunSweeper, TriggerEngine, telemetry, trigger_queue};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "conveyor-engined")]
#[command(author, version, about = "Conveyor run-trigger engine", long_about = None)]
struct Args {
    /// YAML configuration file.
    #[arg(short, long, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(&config.log_level, config.log_json);

    let db = Database::connect(&config.database_url, config.max_connections)
        .await
        .context("connecting to database")?;
    db.migrate().await.context("running migrations")?;

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let authorizer = Arc::new(PgAuthorizer::new(db.pool().clone()));
    let engine = Arc::new(TriggerEngine::new(store.clone(), authorizer, &config));

    let (sender, worker) = trigger_queue(config.trigger_queue_capacity, engine, config.trigger_concurrency);
    let sweeper = StalledRunSweeper::new(store, sender, config.sweep_interval(), config.io_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));
    let sweeper_handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    info!(region = %config.default_region, "Conveyor engine started");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    sweeper_handle.await?;
    worker_handle.await?;
    Ok(())
}
