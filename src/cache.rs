//! Shared hot-path projection: position hash + pub/sub channel, and the
//! mark-price waterfall read.
//!
//! New module against the `redis` crate directly (chosen from
//! `examples/other_examples/manifests/{nautechsystems-nautilus_trader,
//! barter-rs-barter-rs}/Cargo.toml`).

use redis::AsyncCommands;

use crate::config::CacheConfig;
use crate::fixed_point::Mantissa;
use crate::model::{MarkSource, PositionSnapshot};

pub struct Cache {
    client: redis::Client,
    config: CacheConfig,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(config.connection_string.clone())?;
        Ok(Self { client, config })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_tokio_connection().await
    }

    /// Upsert the position hash, then publish the snapshot. The hash write
    /// is canonical (see DESIGN.md); the channel publish is only attempted
    /// if it succeeds, and its own failure is non-fatal.
    pub async fn publish_snapshot(&self, snapshot: &PositionSnapshot) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let key = format!("{}:{}", self.config.position_key_prefix, snapshot.position.trader_id);
        let symbol = &snapshot.position.symbol;

        let fields: Vec<(String, String)> = vec![
            (symbol.clone(), snapshot.position.quantity.to_string()),
            (format!("{symbol}:pnl"), snapshot.total_pnl().to_string()),
            (format!("{symbol}:mark"), snapshot.mark_price_mantissa.to_string()),
            (format!("{symbol}:source"), format!("{:?}", snapshot.mark_source)),
            (format!("{symbol}:trades"), snapshot.position.trade_count.to_string()),
        ];
        let _: () = conn.hset_multiple(&key, &fields).await?;

        let channel = format!("{}:{}", self.config.channel_prefix, snapshot.position.trader_id);
        let payload = serde_json::to_string(snapshot).unwrap_or_default();
        let _: Result<i64, redis::RedisError> = conn.publish(&channel, payload).await;

        Ok(())
    }

    /// Mark-price waterfall: OFFICIAL (close) -> LTP -> MID -> STALE.
    pub async fn read_mark_price(&self, symbol: &str) -> Result<(Mantissa, MarkSource), redis::RedisError> {
        let mut conn = self.connection().await?;
        for (suffix, source) in [
            ("close", MarkSource::Official),
            ("ltp", MarkSource::Ltp),
            ("mid", MarkSource::Mid),
            ("stale", MarkSource::Stale),
        ] {
            let key = format!("{}:{}:{}", self.config.price_key_prefix, suffix, symbol);
            let value: Option<i64> = conn.get(&key).await?;
            if let Some(mantissa) = value {
                return Ok((mantissa, source));
            }
        }
        Ok((0, MarkSource::Stale))
    }
}

#[cfg(test)]
mod tests {
    // Requires a live Redis at redis://127.0.0.1:6379, following the
    // `db/mod.rs` precedent of marking live-dependency tests #[ignore].
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn qa_publish_and_read_mark_price_live_redis() {
        let cache = Cache::new(CacheConfig::default()).unwrap();
        let mut conn = cache.connection().await.unwrap();
        let _: () = redis::cmd("SET")
            .arg("price:ltp:AAPL")
            .arg(17_500_000_000i64)
            .query_async(&mut conn)
            .await
            .unwrap();

        let (mantissa, source) = cache.read_mark_price("AAPL").await.unwrap();
        assert_eq!(mantissa, 17_500_000_000);
        assert_eq!(source, MarkSource::Ltp);
    }
}
