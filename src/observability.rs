use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "flightline_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "flightline_http_request_duration_seconds";

/// Counter: booking attempts. Labels: outcome
/// (confirmed, qualification, conflict, grounded, rejected).
pub const BOOKINGS_TOTAL: &str = "flightline_bookings_total";

/// Counter: committed lifecycle transitions. Labels: to
/// (cancelled, completed, no_show).
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "flightline_reservation_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "flightline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "flightline_wal_flush_batch_size";

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
