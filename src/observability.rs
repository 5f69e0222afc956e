use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "maitred_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "maitred_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "maitred_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "maitred_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "maitred_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "maitred_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "maitred_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "maitred_wal_flush_batch_size";

// ── Slot lock coordinator ────────────────────────────────────────

/// Counter: acquire attempts that found the slot already claimed.
pub const LOCK_CONTENTION_TOTAL: &str = "maitred_lock_contention_total";

/// Counter: acquires that gave up after exhausting their wait budget.
pub const LOCK_TIMEOUTS_TOTAL: &str = "maitred_lock_timeouts_total";

/// Counter: expired claims taken over by a new owner.
pub const LOCK_RECLAIMED_TOTAL: &str = "maitred_lock_reclaimed_total";

/// Gauge: slot claims currently held.
pub const LOCKS_HELD: &str = "maitred_locks_held";

// ── Booking outcomes ─────────────────────────────────────────────

/// Counter: bookings committed. Labels: none.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "maitred_bookings_committed_total";

/// Counter: committed bookings that overrode a pacing-full slot.
pub const BOOKINGS_OVERRIDDEN_TOTAL: &str = "maitred_bookings_overridden_total";

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
        Command::CreateRestaurant { .. } => "create_restaurant",
        Command::DeleteRestaurant { .. } => "delete_restaurant",
        Command::AddTable { .. } => "add_table",
        Command::RetireTable { .. } => "retire_table",
        Command::AddRule { .. } => "add_rule",
        Command::RemoveRule { .. } => "remove_rule",
        Command::AddPeriod { .. } => "add_period",
        Command::RemovePeriod { .. } => "remove_period",
        Command::CreateBooking { .. } => "create_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::Availability { .. } => "availability",
        Command::AvailableTables { .. } => "available_tables",
        Command::ListBookings { .. } => "list_bookings",
        Command::ListTables { .. } => "list_tables",
        Command::ListRestaurants => "list_restaurants",
    }
}
