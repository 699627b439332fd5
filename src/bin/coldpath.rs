//! Cold-path (regulatory) service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use eod_pipeline::coldpath::ColdPathService;
use eod_pipeline::config::AppConfig;
use eod_pipeline::dlq::DlqWriter;
use eod_pipeline::logging::init_logging;
use eod_pipeline::metrics as svc_metrics;
use eod_pipeline::reference_data::ReferenceData;
use eod_pipeline::store::Store;
use eod_pipeline::trades_log::{InMemoryConsumer, InMemoryLog};

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
}

async fn health(State(state): State<AppState>) -> StatusCode {
    if state.store.health_check().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/coldpath.yaml"));
    let config = AppConfig::load(&config_path)?;
    let _guard = init_logging(&config.log);
    let prometheus_handle = svc_metrics::install_recorder();

    tracing::info!("cold-path service: init");

    // Idempotent schema initialization with bounded retry on connect.
    let store = {
        let mut attempts = 0;
        loop {
            match Store::connect(&config.store).await {
                Ok(store) => {
                    store.init_schema().await?;
                    break Arc::new(store);
                }
                Err(e) if attempts < 5 => {
                    attempts += 1;
                    tracing::warn!(error = %e, attempts, "store connect failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let trades_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let dlq_log = Arc::new(InMemoryLog::new(config.trades_log.partitions, config.producer.batch_size));
    let partitions: Vec<u32> = (0..config.trades_log.partitions).collect();
    let consumer: Arc<dyn eod_pipeline::trades_log::Consumer> =
        Arc::new(InMemoryConsumer::new(trades_log, partitions));
    let reference_data = Arc::new(ReferenceData::empty());
    let dlq = DlqWriter::new(dlq_log, "coldpath");

    let mut service = ColdPathService::new(
        consumer,
        store.clone(),
        reference_data,
        dlq,
        config.store.bulk_batch_size,
        config.store.flush_age(),
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState {
            store,
            prometheus: prometheus_handle,
        });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.health_port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    tracing::info!("cold-path service: ready");

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

    tracing::info!("cold-path service: draining");
    service.flush().await;
    tracing::info!("cold-path service: stopped");
    Ok(())
}
