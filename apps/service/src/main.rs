use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clusteruptime::config::Config;
use clusteruptime::monitoring::Manager;
use clusteruptime::store::{self, MemoryStore, Store};
use logger::LogFormat;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "clusteruptime", version)]
#[command(about = "Probe configured endpoints and record their availability")]
struct Cli {
    /// Path to the TOML config file, created with defaults if missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database path from the config file
    #[arg(long)]
    db_path: Option<String>,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long, conflicts_with = "db_path")]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref()).context("loading config")?;
    config.apply_env().context("reading environment overrides")?;
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }

    let format = config.logging.format.parse::<LogFormat>().unwrap_or_else(|e| {
        eprintln!("{e}, using compact logs");
        LogFormat::Compact
    });
    logger::init_with(&config.logging.level, format);
    debug!("{}", config);

    let store: Arc<dyn Store> = if cli.ephemeral {
        warn!("Running with an in-memory store, history is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let db = store::initialize_store(&config.database.path)
            .await
            .with_context(|| format!("opening database {}", config.database.path))?;
        info!(path = %config.database.path, "Database ready");
        Arc::new(db)
    };

    let manager = Manager::with_http(
        store,
        config.monitoring.probe_timeout_seconds,
        config.monitoring.default_latency_threshold_ms,
    )?;

    let report = manager.start().await?;
    for failure in &report.failures {
        warn!("{}", failure);
    }

    let period = Duration::from_secs(config.monitoring.sync_interval_seconds.max(1));
    let mut resync = interval(period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // start() already synced
    resync.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = resync.tick() => match manager.sync().await {
                Ok(report) if !report.is_unchanged() => info!(
                    started = report.started.len(),
                    reconfigured = report.reconfigured.len(),
                    stopped = report.stopped.len(),
                    "Monitor set changed"
                ),
                Ok(_) => {}
                Err(e) => error!("Sync failed, keeping current workers: {}", e),
            },
        }
    }

    info!("Shutting down");
    manager.stop().await;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => debug!("Received SIGINT"),
        _ = terminate => debug!("Received SIGTERM"),
    }
}
