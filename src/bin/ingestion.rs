//! Ingestion service entrypoint.
//!
//! `/health` and `/metrics` surface grounded on
//! `gateway/handlers/health.rs`'s handler shape; `init -> ready -> draining
//! -> stopped` lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use eod_pipeline::archive::ArchiveStore;
use eod_pipeline::circuit_breaker::CircuitBreaker;
use eod_pipeline::config::AppConfig;
use eod_pipeline::dlq::DlqWriter;
use eod_pipeline::ingestion::{IngestionService, TradeInput};
use eod_pipeline::logging::init_logging;
use eod_pipeline::metrics as svc_metrics;
use eod_pipeline::trades_log::InMemoryLog;

#[derive(Clone)]
struct AppState {
    trades_log: Arc<InMemoryLog>,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
    service: Arc<IngestionService>,
}

async fn health(State(state): State<AppState>) -> StatusCode {
    if state.trades_log.partition_count() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

/// Accepts one trade submission, scales its decimal price to mantissa, and
/// runs it through the ingest pipeline. Returns 202 once the trade has been
/// either published or routed to DLQ; a malformed price is rejected with
/// 422 before it ever reaches the pipeline's own validation.
async fn ingest(State(state): State<AppState>, Json(input): Json<TradeInput>) -> StatusCode {
    match state.service.submit(input).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/ingestion.yaml"));
    let config = AppConfig::load(&config_path)?;
    let _guard = init_logging(&config.log);
    let prometheus_handle = svc_metrics::install_recorder();

    tracing::info!("ingestion service: init");

    let trades_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let dlq_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let archive = Arc::new(ArchiveStore::local(&config.archive.root)?);
    let archive_breaker = CircuitBreaker::new(config.circuit_breakers.archive.build("archive"));
    let dlq = DlqWriter::new(dlq_log, "ingestion");

    let service = Arc::new(IngestionService::new(trades_log.clone(), Some(archive), archive_breaker, dlq));

    let app_state = AppState {
        trades_log: trades_log.clone(),
        prometheus: prometheus_handle,
        service,
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/trades", post(ingest))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.health_port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    tracing::info!("ingestion service: ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("ingestion service: draining");
    tracing::info!("ingestion service: stopped");
    Ok(())
}
