use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reserve calls. Labels: status.
pub const RESERVE_TOTAL: &str = "studiobook_reserve_total";

/// Counter: cancel calls. Labels: status.
pub const CANCEL_TOTAL: &str = "studiobook_cancel_total";

/// Counter: calls that gave up waiting for ledger locks.
pub const CONTENTION_TOTAL: &str = "studiobook_contention_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active bookings across all students.
pub const BOOKINGS_ACTIVE: &str = "studiobook_bookings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studiobook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studiobook_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a rejection to a short status label for metrics.
pub fn rejection_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidRequest(_) => "invalid_request",
        EngineError::MonthlyQuotaExceeded { .. } => "monthly_quota",
        EngineError::DailyQuotaExceeded { .. } => "daily_quota",
        EngineError::SlotFull(_) => "slot_full",
        EngineError::DuplicateBooking(_) => "duplicate",
        EngineError::CutoffViolation(_) => "cutoff",
        EngineError::NotFound(_) => "not_found",
        EngineError::Contention => "contention",
        EngineError::WalError(_) => "wal_error",
    }
}
