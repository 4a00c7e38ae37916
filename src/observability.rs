use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotd_bookings_created_total";

/// Counter: bookings canceled (capacity released).
pub const BOOKINGS_CANCELED_TOTAL: &str = "slotd_bookings_canceled_total";

/// Counter: checkout holds granted.
pub const LOCKS_ACQUIRED_TOTAL: &str = "slotd_locks_acquired_total";

/// Counter: lock/booking attempts rejected by the oversell guard.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "slotd_capacity_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "slotd_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "slotd_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSlot { .. } => "insert_slot",
        Command::UpdateSlot { .. } => "update_slot",
        Command::InsertLock { .. } => "insert_lock",
        Command::DeleteLock { .. } => "delete_lock",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectLocks { .. } => "select_locks",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
