use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: bookings (or reactivations) refused because the table was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "covers_reservation_conflicts_total";

/// Histogram: tables returned per availability query.
pub const AVAILABLE_TABLES: &str = "covers_available_tables";

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
        Command::InsertRestaurant { .. } => "insert_restaurant",
        Command::SelectRestaurants { slug: Some(_) } => "resolve_slug",
        Command::SelectRestaurants { slug: None } => "select_restaurants",
        Command::InsertTable { .. } => "insert_table",
        Command::SelectTables { .. } => "select_tables",
        Command::UpdateTable { .. } => "update_table",
        Command::DeleteTable { .. } => "delete_table",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::SelectAvailableTables { .. } => "select_available_tables",
    }
}
