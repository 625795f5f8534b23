use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use parkwise::config::Config;
use parkwise::engine::{Engine, EngineOptions};
use parkwise::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    parkwise::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let options = EngineOptions {
        timezone: config.timezone,
        ..EngineOptions::default()
    };
    let engine = Arc::new(Engine::new(config.wal_path(), notify.clone(), options)?);

    info!("parkwise engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.timezone);
    info!("  compact: every {:?} past {} appends", config.compact_interval, config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(parkwise::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    // Committed events are handed to the notification fan-out from here.
    let mut events = notify.subscribe_all();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok((spot_id, event)) => debug!(%spot_id, ?event, "committed"),
                Err(RecvError::Lagged(n)) => warn!("event listener lagged, skipped {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    shutdown_signal().await?;
    info!("shutdown signal received");

    compactor.abort();
    listener.abort();
    if let Err(e) = engine.compact_wal().await {
        error!("final WAL compaction failed: {e}");
    }

    info!("parkwise stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
