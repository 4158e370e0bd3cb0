use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use berth::config::{EngineConfig, ServerConfig};
use berth::engine::BookingEngine;
use berth::notify::NotifyHub;
use berth::scanner;
use berth::store::MemStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = ServerConfig::from_env();
    let config = EngineConfig::from_env();
    berth::observability::init(server.metrics_port)?;

    std::fs::create_dir_all(&server.data_dir)?;

    let store = Arc::new(MemStore::open(server.wal_path())?);
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(BookingEngine::new(store.clone(), config.clone()).with_notifier(notify));

    info!("berth started");
    info!("  data_dir: {}", server.data_dir.display());
    info!("  max_holds_per_user: {}", config.max_holds_per_user);
    info!("  hold_timeout: {}s", config.hold_timeout_ms / 1000);
    info!("  hold_grace: {}s", config.hold_grace_ms / 1000);
    info!("  cleanup_interval: {}s", config.cleanup_interval_ms / 1000);
    info!(
        "  metrics: {}",
        server
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let token = CancellationToken::new();
    let scanner_task = tokio::spawn(scanner::run_hold_scanner(engine.clone(), token.clone()));
    let compactor_task = tokio::spawn(scanner::run_compactor(
        store.clone(),
        server.compact_threshold,
        token.clone(),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    token.cancel();
    let _ = tokio::join!(scanner_task, compactor_task);

    if let Err(e) = store.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }
    info!("berth stopped");
    Ok(())
}
