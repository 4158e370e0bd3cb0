use std::net::SocketAddr;

use crate::engine::ErrorKind;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "berth_operations_total";

/// Histogram: operation latency in seconds, including lock waits. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "berth_operation_duration_seconds";

// ── Background work ─────────────────────────────────────────────

/// Counter: holds reclaimed by the expiry sweep.
pub const HOLDS_SWEPT_TOTAL: &str = "berth_holds_swept_total";

/// Counter: per-user sweep groups rolled back.
pub const SWEEP_GROUP_FAILURES_TOTAL: &str = "berth_sweep_group_failures_total";

/// Histogram: full sweep pass duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "berth_sweep_duration_seconds";

/// Counter: seat release notifications that failed to deliver.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "berth_notifications_failed_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "berth_wal_flush_duration_seconds";

/// Histogram: commits per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "berth_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Outcome label for an operation result.
pub fn outcome_label(kind: Option<ErrorKind>) -> &'static str {
    match kind {
        None => "ok",
        Some(ErrorKind::NotFound) => "not_found",
        Some(ErrorKind::InvalidState) => "invalid_state",
        Some(ErrorKind::Unauthorized) => "unauthorized",
        Some(ErrorKind::Expired) => "expired",
        Some(ErrorKind::StoreFailure) => "store_failure",
    }
}
