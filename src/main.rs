use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use flightline::engine::{Clock, Engine};
use flightline::http::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FLIGHTLINE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    flightline::observability::init(metrics_port);

    let port = std::env::var("FLIGHTLINE_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("FLIGHTLINE_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("FLIGHTLINE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("FLIGHTLINE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Club-local day boundary. Bookings are checked against "today" in this
    // offset, so it should match the airfield's zone.
    let clock = match std::env::var("FLIGHTLINE_UTC_OFFSET_HOURS")
        .ok()
        .and_then(|s| s.parse::<i8>().ok())
    {
        Some(hours) => Clock::with_offset_hours(hours).unwrap_or_else(|| {
            tracing::warn!("invalid FLIGHTLINE_UTC_OFFSET_HOURS, falling back to UTC");
            Clock::utc()
        }),
        None => Clock::utc(),
    };

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let wal_path = PathBuf::from(&data_dir).join("flightline.wal");
    let engine = Arc::new(Engine::new(wal_path, clock)?);
    tokio::spawn(flightline::compactor::run_compactor(
        engine.clone(),
        compact_threshold,
    ));

    let app = build_router(AppState { engine });

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("flightline listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  compact_threshold: {compact_threshold}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("flightline stopped");
    Ok(())
}
