//! Counter/histogram/gauge hooks: an ambient operational surface even
//! though transport/dashboards are out of scope here; the
//! `PrometheusBuilder` below only exposes `/metrics` for local scraping,
//! following `metrics-exporter-prometheus`'s standard install pattern
//! (from `cooprefr-bettersys/rust-backend/Cargo.toml`).
//!
//! The counters recorded replace `pipeline.rs`'s hand-rolled
//! `PipelineStats` atomics with calls into a real metrics registry
//! (`trades_rejected`, `archive_skipped`, `publish_failed`,
//! `cache_publish_skipped`, `enrichment_miss`, `enqueue_failed`).

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

pub fn incr_trades_ingested() {
    counter!("trades_ingested_total", 1);
}

pub fn incr_trades_rejected() {
    counter!("trades_rejected_total", 1);
}

pub fn incr_archive_skipped() {
    counter!("archive_skipped_total", 1);
}

pub fn incr_publish_failed() {
    counter!("publish_failed_total", 1);
}

pub fn incr_cache_publish_skipped() {
    counter!("cache_publish_skipped_total", 1);
}

pub fn incr_enrichment_miss() {
    counter!("enrichment_miss_total", 1);
}

pub fn incr_enqueue_failed() {
    counter!("dlq_enqueue_failed_total", 1);
}

pub fn incr_dlq_written(service: String, reason: &'static str) {
    counter!("dlq_written_total", 1, "service" => service, "reason" => reason);
}

pub fn record_retry(service: &'static str, attempt: u32) {
    counter!("downstream_retry_total", 1, "service" => service);
    gauge!("downstream_retry_attempt", attempt as f64, "service" => service);
}

pub fn record_batch_flush(service: &'static str, size: usize) {
    histogram!("batch_flush_size", size as f64, "service" => service);
}

pub fn record_latency_ns(stage: &'static str, nanos: u64) {
    histogram!("stage_latency_ns", nanos as f64, "stage" => stage);
}
