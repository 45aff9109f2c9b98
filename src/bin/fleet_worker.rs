//! # Fleet Worker
//!
//! Service process running the task dispatch loop against PostgreSQL.
//! Any number of these may run side by side; task claims keep each attempt on
//! a single process.

use anyhow::Context;
use clap::Parser;
use fleet_core::config::ConfigManager;
use fleet_core::execution::{PgTaskQueue, TaskManager};
use fleet_core::logging::init_structured_logging;
use fleet_core::storage::PgResourceStorage;
use fleet_core::tenant_manager::HttpTenantManagerClient;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fleet-worker")]
#[command(about = "Run the fleet task dispatch loop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory containing fleet.toml and fleet.<environment>.toml
    #[arg(short, long, env = "FLEET_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (defaults to FLEET_ENV, then APP_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Process one batch of due tasks and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let environment = cli
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        .context("failed to load configuration")?;
    let config = manager.config();

    init_structured_logging(&config.logging, manager.environment());
    info!(
        environment = manager.environment(),
        config_dir = %manager.config_directory().display(),
        "🚀 Starting fleet worker"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        info!("✅ Database migrations applied");
    }

    let storage = Arc::new(PgResourceStorage::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(
        pool.clone(),
        config.task_manager.claim_timeout(),
    ));
    let tenants = Arc::new(HttpTenantManagerClient::new()?);
    let workers = fleet_core::workers::default_registry(storage.clone(), tenants, &config.scheduling)?;
    let task_manager = TaskManager::new(queue, storage, workers, config);

    if cli.once {
        let summary = task_manager.process_due_tasks().await?;
        info!(summary = ?summary, "Processed one batch");
        pool.close().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    task_manager.run(shutdown_rx).await?;
    pool.close().await;
    Ok(())
}
