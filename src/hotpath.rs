//! Hot-path (Flash P&L) service: per-(trader, symbol) position state,
//! cached mark-price waterfall, published snapshots.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::cache::Cache;
use crate::circuit_breaker::{CallResult, CircuitBreaker};
use crate::dlq::{DlqSend, DlqWriter};
use crate::error::{ErrorKind, HotPathError};
use crate::metrics;
use crate::model::{Position, TradeEnvelope};
use crate::trades_log::{Consumer, Offset, Partition};

/// Position map owned exclusively by this instance for its assigned
/// partitions; no cross-instance sharing.
pub struct HotPathService {
    consumer: Arc<dyn Consumer>,
    cache: Arc<Cache>,
    cache_breaker: CircuitBreaker,
    dlq: DlqWriter,
    positions: FxHashMap<(String, String), Position>,
    commit_every_n: u64,
    commit_every: Duration,
    processed_since_commit: u64,
    last_commit_at: std::time::Instant,
}

impl HotPathService {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        cache: Arc<Cache>,
        cache_breaker: CircuitBreaker,
        dlq: DlqWriter,
        commit_every_n: u64,
        commit_every: Duration,
    ) -> Self {
        Self {
            consumer,
            cache,
            cache_breaker,
            dlq,
            positions: FxHashMap::default(),
            commit_every_n,
            commit_every,
            processed_since_commit: 0,
            last_commit_at: std::time::Instant::now(),
        }
    }

    /// Process one record from the log. Partition-serial by construction
    /// (the caller drives one instance per owned partition set).
    pub async fn process_one(&mut self, key: String, value: Vec<u8>, partition: Partition, offset: Offset) {
        let envelope: TradeEnvelope = match bincode::deserialize(&value) {
            Ok(e) => e,
            Err(e) => {
                let err = HotPathError::Deserialize(e);
                self.dlq
                    .send(DlqSend {
                        original_topic: "trades.raw",
                        partition,
                        offset,
                        key: Some(key),
                        payload: value,
                        reason: err.kind().dlq_reason(),
                        error_message: err.to_string(),
                        retry_count: 0,
                        metadata: Default::default(),
                    })
                    .await;
                self.consumer.commit(partition, offset).await;
                return;
            }
        };

        let position_key = (envelope.trader_id.clone(), envelope.symbol.clone());
        let position = self
            .positions
            .entry(position_key)
            .or_insert_with(|| Position::new(envelope.trader_id.clone(), envelope.symbol.clone()));
        position.apply_trade(&envelope);

        let mark_result = self
            .cache_breaker
            .execute_classified(
                || async { self.cache.read_mark_price(&envelope.symbol).await },
                |_| Some(ErrorKind::DownstreamTransient),
            )
            .await;
        let (mark_price, mark_source) = match mark_result {
            Ok(result) => result,
            Err(call_result) => {
                let err = match call_result {
                    CallResult::Failed(e) => HotPathError::Cache(e),
                    CallResult::CircuitOpen(e) => HotPathError::CircuitOpen(e.name),
                };
                tracing::debug!(kind = ?err.kind(), error = %err, "mark price read failed, using stale");
                (0, crate::model::MarkSource::Stale)
            }
        };

        let snapshot = position.snapshot(mark_price, mark_source);

        let publish_result = self
            .cache_breaker
            .execute_classified(
                || async { self.cache.publish_snapshot(&snapshot).await },
                |_| Some(ErrorKind::DownstreamTransient),
            )
            .await;
        if let Err(call_result) = publish_result {
            // Skip the publish only; in-memory state is the truth and will
            // re-publish on the next trade.
            let err = match call_result {
                CallResult::Failed(e) => HotPathError::Cache(e),
                CallResult::CircuitOpen(e) => HotPathError::CircuitOpen(e.name),
            };
            metrics::incr_cache_publish_skipped();
            tracing::debug!(kind = ?err.kind(), error = %err, "snapshot publish skipped");
        }

        self.processed_since_commit += 1;
        // Commit every N messages or T seconds, whichever first.
        if self.processed_since_commit >= self.commit_every_n
            || self.last_commit_at.elapsed() >= self.commit_every
        {
            self.consumer.commit(partition, offset).await;
            self.processed_since_commit = 0;
            self.last_commit_at = std::time::Instant::now();
        }
    }

    pub fn position(&self, trader_id: &str, symbol: &str) -> Option<&Position> {
        self.positions.get(&(trader_id.to_string(), symbol.to_string()))
    }

    /// On partition-revoked: flush offsets then drop in-memory state for
    /// those partitions. State is rebuilt by log replay on re-assignment,
    /// not preserved.
    pub fn drop_partition_state(&mut self, trader_ids: &[String]) {
        self.positions.retain(|(trader_id, _), _| !trader_ids.contains(trader_id));
    }

    pub async fn run_once(&mut self) -> bool {
        match self.consumer.poll().await {
            Some(record) => {
                self.process_one(record.key, record.value, record.partition, record.offset)
                    .await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::config::CacheConfig;
    use crate::model::Side;
    use crate::trades_log::{InMemoryConsumer, InMemoryLog, Producer};
    use chrono::Utc;

    fn envelope(exec_id: &str, side: Side, qty: i64, price: i64) -> TradeEnvelope {
        TradeEnvelope {
            exec_id: exec_id.to_string(),
            symbol: "AAPL".into(),
            quantity: qty,
            price_mantissa: price,
            side,
            exec_ts: Utc::now(),
            order_id: "O1".into(),
            client_order_id: None,
            trader_id: "T001".into(),
            account: "ACC1".into(),
            exchange: "XNAS".into(),
            gateway_id: None,
            receive_ts: Utc::now(),
            raw_bytes: vec![],
        }
    }

    #[tokio::test]
    async fn qa_position_folds_in_order() {
        let trades = Arc::new(InMemoryLog::new(1, 16));
        trades.publish("T001", envelope("X1", Side::Buy, 100, 15_000_000_000).encode().unwrap()).await.unwrap();
        trades.publish("T001", envelope("X2", Side::Sell, 40, 20_000_000_000).encode().unwrap()).await.unwrap();

        let consumer: Arc<dyn Consumer> = Arc::new(InMemoryConsumer::new(trades.clone(), vec![0]));
        let dlq_log = Arc::new(InMemoryLog::new(1, 16));
        // cache is unreachable in this unit test; the storage breaker trips
        // immediately and the publish is skipped, matching universal
        // property 4 (hot path keeps folding despite cache unavailability).
        let cache = Arc::new(Cache::new(CacheConfig {
            connection_string: "redis://127.0.0.1:1".into(),
            ..CacheConfig::default()
        }).unwrap());

        let mut svc = HotPathService::new(
            consumer,
            cache,
            CircuitBreaker::new(CircuitBreakerConfig::storage("cache")),
            DlqWriter::new(dlq_log, "hotpath"),
            500,
            Duration::from_secs(5),
        );

        while svc.run_once().await {}

        let position = svc.position("T001", "AAPL").unwrap();
        assert_eq!(position.quantity, 60);
        assert_eq!(position.realized_pnl_mantissa, 200_000_000_000);
    }
}
