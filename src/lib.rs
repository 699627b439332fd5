//! eod-pipeline — a CQRS trade-processing pipeline.
//!
//! Validated ingestion publishes to a durable partitioned event log; a
//! hot path folds per-(trader, symbol) position state for sub-100ms P&L,
//! and a cold path enriches and idempotently persists every trade for
//! audit. See `SPEC_FULL.md` for the full requirements and `DESIGN.md` for
//! the grounding ledger.

pub mod archive;
pub mod cache;
pub mod circuit_breaker;
pub mod coldpath;
pub mod config;
pub mod dlq;
pub mod error;
pub mod fixed_point;
pub mod hotpath;
pub mod ingestion;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod reference_data;
pub mod store;
pub mod trades_log;
