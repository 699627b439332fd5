//! Hot-path (Flash P&L) service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use eod_pipeline::cache::Cache;
use eod_pipeline::circuit_breaker::CircuitBreaker;
use eod_pipeline::config::AppConfig;
use eod_pipeline::dlq::DlqWriter;
use eod_pipeline::hotpath::HotPathService;
use eod_pipeline::logging::init_logging;
use eod_pipeline::metrics as svc_metrics;
use eod_pipeline::trades_log::{InMemoryConsumer, InMemoryLog};

#[derive(Clone)]
struct AppState {
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
}

async fn health(State(_state): State<AppState>) -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/hotpath.yaml"));
    let config = AppConfig::load(&config_path)?;
    let _guard = init_logging(&config.log);
    let prometheus_handle = svc_metrics::install_recorder();

    tracing::info!("hot-path service: init");

    let trades_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let dlq_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let partitions: Vec<u32> = (0..config.trades_log.partitions).collect();
    let consumer: Arc<dyn eod_pipeline::trades_log::Consumer> =
        Arc::new(InMemoryConsumer::new(trades_log, partitions));
    let cache = Arc::new(Cache::new(config.cache.clone())?);
    let cache_breaker = CircuitBreaker::new(config.circuit_breakers.cache.build("cache"));
    let dlq = DlqWriter::new(dlq_log, "hotpath");

    let mut service = HotPathService::new(
        consumer,
        cache,
        cache_breaker,
        dlq,
        config.trades_log.commit_every_n,
        Duration::from_secs(config.trades_log.commit_every_secs),
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState {
            prometheus: prometheus_handle,
        });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.health_port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    tracing::info!("hot-path service: ready");

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            processed = service.run_once() => {
                if !processed {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    tracing::info!("hot-path service: draining");
    tracing::info!("hot-path service: stopped");
    Ok(())
}
