//! tsdb-gateway: HTTP front end for a time-series store.
//!
//! Serves the `/api/v1` REST surface and periodically publishes its own
//! ingest counters and aggregated request timings back into the store.
//! See [`tsdb_gateway::config`] for the configuration keys.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use model::{Datastore, MemoryDatastore};
use tracing::info;
use tsdb_gateway::{config::GatewayConfig, http, query_parser::PluginRegistry, telemetry::Telemetry, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tsdb_gateway=info".parse()?),
        )
        .json()
        .init();

    let config = GatewayConfig::load()?;
    let cache_dir = config.cache_dir();
    std::fs::create_dir_all(&cache_dir)?;

    let datastore: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new(&cache_dir));
    let state = AppState::from_config(&config, datastore, PluginRegistry::new())?;
    info!(
        enabled = %state.gate,
        cache_dir = %cache_dir.display(),
        aggregate_stats = config.aggregate_stats,
        "gateway configured"
    );

    if config.report_interval_secs > 0 {
        tokio::spawn(report_loop(
            Arc::clone(&state.telemetry),
            Duration::from_secs(config.report_interval_secs),
        ));
    }

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = config.bind_addr, "tsdb-gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("tsdb-gateway stopped");
    Ok(())
}

/// Publish the gateway's own counters and aggregated timings each tick.
async fn report_loop(telemetry: Arc<Telemetry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp_millis();
        let sets = telemetry.collect_self_metrics(now);
        if !sets.is_empty() {
            telemetry.publish_sets(sets);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
