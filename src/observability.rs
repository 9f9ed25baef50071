use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "charterd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "charterd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "charterd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "charterd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "charterd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "charterd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "charterd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "charterd_wal_flush_batch_size";

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
        Command::InsertRequest { .. } => "insert_request",
        Command::InsertResponse { .. } => "insert_response",
        Command::InsertConfirmation { .. } => "insert_confirmation",
        Command::InsertRejection { .. } => "insert_rejection",
        Command::InsertScheduleEvent { .. } => "insert_schedule_event",
        Command::DeleteScheduleEvent { .. } => "delete_schedule_event",
        Command::SelectRequests { .. } => "select_requests",
        Command::SelectResponses { .. } => "select_responses",
        Command::SelectPendingRequests { .. } => "select_pending_requests",
        Command::SelectActionableRequests => "select_actionable_requests",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::Listen { .. } => "listen",
    }
}
