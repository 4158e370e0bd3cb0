use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{BookingEngine, BookingStore};
use crate::notify::publish_released;
use crate::store::MemStore;

/// Background task that periodically reclaims expired holds and announces
/// the freed seats. Runs until `shutdown` is cancelled.
pub async fn run_hold_scanner<S: BookingStore>(engine: Arc<BookingEngine<S>>, shutdown: CancellationToken) {
    let period = Duration::from_millis(engine.config().cleanup_interval_ms.max(1) as u64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("hold scanner stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        match engine.sweep_expired_holds().await {
            Ok(report) => publish_released(engine.notifier().as_ref(), &report.by_train),
            Err(e) => error!("expiry sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough commits pile up.
pub async fn run_compactor(store: Arc<MemStore>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("compactor stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        let commits = store.wal_commits_since_compact().await;
        if commits < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!("compacted WAL after {commits} commits"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
