use std::net::SocketAddr;

use crate::model::Role;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentd_query_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings accepted into WAITING.
pub const BOOKINGS_CREATED_TOTAL: &str = "rentd_bookings_created_total";

/// Counter: booking requests refused for overlapping an active booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "rentd_booking_conflicts_total";

/// Counter: owner decisions. Labels: status (APPROVED, REJECTED).
pub const BOOKING_DECISIONS_TOTAL: &str = "rentd_booking_decisions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "rentd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentd_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "rentd_wal_compactions_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::SelectUser { .. } => "select_user",
        Command::SelectUsers { .. } => "select_users",
        Command::InsertItem { .. } => "insert_item",
        Command::UpdateItem { .. } => "update_item",
        Command::SelectItem { .. } => "select_item",
        Command::SelectItems { .. } => "select_items",
        Command::InsertRequest { .. } => "insert_request",
        Command::SelectRequest { .. } => "select_request",
        Command::SelectMyRequests => "select_my_requests",
        Command::SelectOtherRequests { .. } => "select_other_requests",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DecideBooking { approved: true, .. } => "approve_booking",
        Command::DecideBooking { approved: false, .. } => "reject_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { role: Role::Booker, .. } => "select_bookings",
        Command::SelectBookings { role: Role::Owner, .. } => "select_owner_bookings",
    }
}
