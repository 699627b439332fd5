//! Ingestion service: validate -> archive raw bytes -> encode -> publish to
//! the trades log, partitioned by `trader_id`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::archive::ArchiveStore;
use crate::circuit_breaker::{CallResult, CircuitBreaker};
use crate::dlq::{DlqSend, DlqWriter};
use crate::error::{ErrorKind, IngestError};
use crate::fixed_point::parse_mantissa;
use crate::metrics;
use crate::model::{Side, TradeEnvelope};
use crate::trades_log::Producer;

/// Wire-format submission: a decimal `price` string instead of a pre-scaled
/// mantissa, the shape an upstream adapter (FIX gateway, REST submitter,
/// whatever protocol sits in front of this service) would actually hand in.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TradeInput {
    pub exec_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: String,
    pub side: Side,
    pub exec_ts: DateTime<Utc>,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub trader_id: String,
    pub account: String,
    pub exchange: String,
    pub gateway_id: Option<String>,
}

pub struct IngestionService {
    producer: Arc<dyn Producer>,
    archive: Option<Arc<ArchiveStore>>,
    archive_breaker: CircuitBreaker,
    dlq: DlqWriter,
}

impl IngestionService {
    pub fn new(
        producer: Arc<dyn Producer>,
        archive: Option<Arc<ArchiveStore>>,
        archive_breaker: CircuitBreaker,
        dlq: DlqWriter,
    ) -> Self {
        Self {
            producer,
            archive,
            archive_breaker,
            dlq,
        }
    }

    /// Non-exhaustive list of required non-empty fields, positive
    /// quantity/price, side in enum (enforced by the type system already),
    /// finite timestamps.
    fn validate(envelope: &TradeEnvelope) -> Result<(), IngestError> {
        if envelope.exec_id.is_empty() {
            return Err(IngestError::Validation("exec_id is empty".to_string()));
        }
        if envelope.symbol.is_empty() {
            return Err(IngestError::Validation("symbol is empty".to_string()));
        }
        if envelope.trader_id.is_empty() {
            return Err(IngestError::Validation("trader_id is empty".to_string()));
        }
        if envelope.account.is_empty() {
            return Err(IngestError::Validation("account is empty".to_string()));
        }
        if envelope.exchange.is_empty() {
            return Err(IngestError::Validation("exchange is empty".to_string()));
        }
        if envelope.quantity <= 0 {
            return Err(IngestError::Validation("quantity must be positive".to_string()));
        }
        if envelope.price_mantissa <= 0 {
            return Err(IngestError::Validation("price_mantissa must be positive".to_string()));
        }
        Ok(())
    }

    async fn send_to_dlq(&self, envelope: &TradeEnvelope, err: IngestError) {
        self.dlq
            .send(DlqSend {
                original_topic: "trades.raw",
                partition: 0,
                offset: 0,
                key: Some(envelope.trader_id.clone()),
                payload: envelope.raw_bytes.clone(),
                reason: err.kind().dlq_reason(),
                error_message: err.to_string(),
                retry_count: 0,
                metadata: Default::default(),
            })
            .await;
    }

    /// Archive is a compliance aid, not the record of truth: a failure or
    /// an open breaker is logged and the trade proceeds to publish anyway.
    async fn archive_if_configured(&self, envelope: &TradeEnvelope) {
        let Some(archive) = &self.archive else {
            return;
        };
        let raw = envelope.raw_bytes.clone();
        let result = self
            .archive_breaker
            .execute_classified(
                || async { archive.archive_raw(&raw).await },
                |_| Some(ErrorKind::DownstreamTransient),
            )
            .await;
        if let Err(call_result) = result {
            let err = match call_result {
                CallResult::Failed(e) => IngestError::Archive(e),
                CallResult::CircuitOpen(e) => IngestError::CircuitOpen(e.name),
            };
            metrics::incr_archive_skipped();
            tracing::debug!(kind = ?err.kind(), error = %err, "archive skipped for this trade");
        }
    }

    /// Run the full per-trade ingest pipeline. Returns once the trade has
    /// either been published or routed to DLQ — the caller never needs to
    /// retry a call to this function.
    pub async fn process(&self, envelope: TradeEnvelope) {
        if let Err(err) = Self::validate(&envelope) {
            metrics::incr_trades_rejected();
            self.send_to_dlq(&envelope, err).await;
            return;
        }

        self.archive_if_configured(&envelope).await;

        let encoded = match envelope.encode().map_err(IngestError::Encode) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode trade envelope");
                self.send_to_dlq(&envelope, err).await;
                return;
            }
        };

        match self.producer.publish(&envelope.trader_id, encoded).await {
            Ok(_) => {
                metrics::incr_trades_ingested();
            }
            Err(e) => {
                metrics::incr_publish_failed();
                let err = IngestError::Publish(e);
                self.send_to_dlq(&envelope, err).await;
            }
        }
    }

    /// Scale `input.price` to mantissa and hand the resulting envelope to
    /// `process`. An unparsable or overflowing price never reaches
    /// `validate` — it is rejected here and routed to DLQ directly.
    pub async fn submit(&self, input: TradeInput) -> Result<(), IngestError> {
        let raw_bytes = serde_json::to_vec(&input).unwrap_or_default();
        let price_mantissa = match parse_mantissa(&input.price) {
            Ok(mantissa) => mantissa,
            Err(e) => {
                let err = IngestError::Validation(e.to_string());
                metrics::incr_trades_rejected();
                self.dlq
                    .send(DlqSend {
                        original_topic: "trades.raw",
                        partition: 0,
                        offset: 0,
                        key: Some(input.trader_id.clone()),
                        payload: raw_bytes,
                        reason: err.kind().dlq_reason(),
                        error_message: err.to_string(),
                        retry_count: 0,
                        metadata: Default::default(),
                    })
                    .await;
                return Err(err);
            }
        };

        let envelope = TradeEnvelope {
            exec_id: input.exec_id,
            symbol: input.symbol,
            quantity: input.quantity,
            price_mantissa,
            side: input.side,
            exec_ts: input.exec_ts,
            order_id: input.order_id,
            client_order_id: input.client_order_id,
            trader_id: input.trader_id,
            account: input.account,
            exchange: input.exchange,
            gateway_id: input.gateway_id,
            receive_ts: Utc::now(),
            raw_bytes,
        };

        self.process(envelope).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::model::DlqReason;
    use crate::trades_log::{Consumer, InMemoryLog};
    use chrono::Utc;

    fn envelope(exec_id: &str, qty: i64, price: i64) -> TradeEnvelope {
        TradeEnvelope {
            exec_id: exec_id.to_string(),
            symbol: "AAPL".into(),
            quantity: qty,
            price_mantissa: price,
            side: Side::Buy,
            exec_ts: Utc::now(),
            order_id: "O1".into(),
            client_order_id: None,
            trader_id: "T001".into(),
            account: "ACC1".into(),
            exchange: "XNAS".into(),
            gateway_id: None,
            receive_ts: Utc::now(),
            raw_bytes: b"raw".to_vec(),
        }
    }

    fn service(log: Arc<InMemoryLog>) -> IngestionService {
        IngestionService::new(
            log.clone(),
            None,
            CircuitBreaker::new(CircuitBreakerConfig::high_availability("archive")),
            DlqWriter::new(log, "ingestion"),
        )
    }

    #[tokio::test]
    async fn qa_scenario_3_invalid_record_routes_to_dlq() {
        let log = Arc::new(InMemoryLog::new(1, 16));
        let svc = service(log.clone());

        svc.process(envelope("", 100, 15_000_000_000)).await;

        let consumer = crate::trades_log::InMemoryConsumer::new(log, vec![0]);
        let record = consumer.poll().await.expect("dlq entry present");
        let dlq: crate::model::DlqEnvelope = bincode::deserialize(&record.value).unwrap();
        assert_eq!(dlq.reason, DlqReason::Validation);
    }

    #[tokio::test]
    async fn qa_valid_record_publishes_without_dlq() {
        let trades_log = Arc::new(InMemoryLog::new(1, 16));
        let dlq_log = Arc::new(InMemoryLog::new(1, 16));
        let svc = IngestionService::new(
            trades_log.clone(),
            None,
            CircuitBreaker::new(CircuitBreakerConfig::high_availability("archive")),
            DlqWriter::new(dlq_log.clone(), "ingestion"),
        );

        svc.process(envelope("X1", 100, 15_000_000_000)).await;

        assert_eq!(trades_log.len(0), 1);
        assert_eq!(dlq_log.len(0), 0);
    }

    fn trade_input(price: &str) -> TradeInput {
        TradeInput {
            exec_id: "X1".into(),
            symbol: "AAPL".into(),
            quantity: 100,
            price: price.to_string(),
            side: Side::Buy,
            exec_ts: Utc::now(),
            order_id: "O1".into(),
            client_order_id: None,
            trader_id: "T001".into(),
            account: "ACC1".into(),
            exchange: "XNAS".into(),
            gateway_id: None,
        }
    }

    #[tokio::test]
    async fn qa_submit_scales_decimal_price_to_mantissa() {
        let trades_log = Arc::new(InMemoryLog::new(1, 16));
        let dlq_log = Arc::new(InMemoryLog::new(1, 16));
        let svc = IngestionService::new(
            trades_log.clone(),
            None,
            CircuitBreaker::new(CircuitBreakerConfig::high_availability("archive")),
            DlqWriter::new(dlq_log.clone(), "ingestion"),
        );

        svc.submit(trade_input("150.00")).await.unwrap();

        assert_eq!(trades_log.len(0), 1);
        assert_eq!(dlq_log.len(0), 0);
        let consumer = crate::trades_log::InMemoryConsumer::new(trades_log, vec![0]);
        let record = consumer.poll().await.unwrap();
        let published = TradeEnvelope::decode(&record.value).unwrap();
        assert_eq!(published.price_mantissa, 15_000_000_000);
    }

    #[tokio::test]
    async fn qa_submit_rejects_unparsable_price_to_dlq() {
        let trades_log = Arc::new(InMemoryLog::new(1, 16));
        let dlq_log = Arc::new(InMemoryLog::new(1, 16));
        let svc = IngestionService::new(
            trades_log.clone(),
            None,
            CircuitBreaker::new(CircuitBreakerConfig::high_availability("archive")),
            DlqWriter::new(dlq_log.clone(), "ingestion"),
        );

        let err = svc.submit(trade_input("not-a-price")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        assert_eq!(trades_log.len(0), 0);
        let consumer = crate::trades_log::InMemoryConsumer::new(dlq_log, vec![0]);
        let record = consumer.poll().await.expect("dlq entry present");
        let dlq: crate::model::DlqEnvelope = bincode::deserialize(&record.value).unwrap();
        assert_eq!(dlq.reason, DlqReason::Validation);
    }
}
