use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bichat_core::{
    config::{Config, LogFormat},
    storage::TenantStore,
    tenancy::TenantId,
    CheckpointEngine, CheckpointSweeper, SqliteStorage,
};

/// Maintenance commands for the BiChat core database.
#[derive(Parser, Debug)]
#[command(name = "bichat-core", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Delete expired checkpoints once
    Sweep,

    /// Sweep expired checkpoints periodically until Ctrl-C
    Sweeper {
        /// Seconds between sweeps (defaults to CHECKPOINT_SWEEP_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Delete every row belonging to a tenant
    PurgeTenant {
        /// Tenant UUID
        tenant_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "BiChat core starting...");

    // Opening the storage applies pending migrations.
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Migrate => {
            info!("Schema is up to date");
        }
        Commands::Sweep => {
            let engine = CheckpointEngine::new(storage.clone(), &config.checkpoint);
            let removed = engine.sweep().await?;
            info!(removed, "Sweep complete");
        }
        Commands::Sweeper { interval_secs } => {
            let period = interval_secs
                .map(|s| std::time::Duration::from_secs(s.max(1)))
                .unwrap_or_else(|| config.checkpoint.sweep_interval());
            let engine = CheckpointEngine::new(storage.clone(), &config.checkpoint);

            let shutdown = CancellationToken::new();
            let shutdown_clone = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, stopping sweeper");
                    shutdown_clone.cancel();
                }
            });

            info!(interval_secs = period.as_secs(), "Checkpoint sweeper running");
            CheckpointSweeper::start_with_token(engine, period, shutdown)
                .join()
                .await;
        }
        Commands::PurgeTenant { tenant_id } => {
            let tenant: TenantId = tenant_id.parse()?;
            let removed = storage.purge_tenant(tenant).await?;
            info!(tenant_id = %tenant, removed, "Tenant purged");
        }
    }

    storage.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
