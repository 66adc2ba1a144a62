use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docperm_engine::{EngineConfig, GuestSweeper, PermissionEngine};
use docperm_store_sqlite::SqliteStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docperm-sweeper")]
#[command(about = "Expire guest collaborators whose invites have lapsed")]
struct Args {
    /// Database URL (sqlite://path/to/docperm.db)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://docperm.db?mode=rwc")]
    database_url: String,

    /// Seconds between sweeps (overrides DOCPERM_GUEST_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            return Err("--interval-secs must be positive".into());
        }
        config.guest_sweep_interval = Duration::from_secs(secs);
    }

    let store = SqliteStore::open(&args.database_url).await?;
    let interval = config.guest_sweep_interval;
    let engine = PermissionEngine::with_config(Arc::new(store), config);

    if args.once {
        let report = engine.cleanup_expired_guest_permissions().await?;
        info!(
            expired = report.expired,
            grants_removed = report.grants_removed,
            failed = report.failed,
            "Single sweep complete"
        );
        return Ok(());
    }

    info!(database_url = %args.database_url, interval_secs = interval.as_secs(), "Starting docperm-sweeper");
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = GuestSweeper::spawn(engine, interval, shutdown_rx);

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
