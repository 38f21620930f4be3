use std::net::SocketAddr;

// ── Request-driven ─────────────────────────────────────────────

/// Counter: booking submissions. Labels: outcome, reason (rejections only).
pub const BOOKINGS_TOTAL: &str = "rentabike_bookings_total";

/// Counter: reservation writes. Labels: op (insert, update, delete).
pub const RESERVATION_WRITES_TOTAL: &str = "rentabike_reservation_writes_total";

/// Counter: cached bike statuses rewritten after re-derivation.
pub const STATUS_CHANGES_TOTAL: &str = "rentabike_status_changes_total";

// ── Background ─────────────────────────────────────────────────

/// Counter: sweeper passes. Labels: status (ok, error).
pub const SWEEPS_TOTAL: &str = "rentabike_sweeps_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentabike_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentabike_wal_flush_batch_size";

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
