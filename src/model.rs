//! Shared data-model primitives: trade envelope, enriched trade, position,
//! position snapshot, DLQ envelope.
//!
//! Grounded on the event/queue shapes in `pipeline.rs` (`SequencedOrder`,
//! `PipelineEvent`) and the fixed-point discipline of `money.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fixed_point::{avg_price, Mantissa};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    SellShort,
}

/// Canonical record of one execution, with raw bytes attached.
/// Published once to the trades log and never mutated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEnvelope {
    pub exec_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub price_mantissa: Mantissa,
    pub side: Side,
    pub exec_ts: DateTime<Utc>,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub trader_id: String,
    pub account: String,
    pub exchange: String,
    pub gateway_id: Option<String>,
    pub receive_ts: DateTime<Utc>,
    pub raw_bytes: Vec<u8>,
}

impl TradeEnvelope {
    /// Encode to the canonical binary wire form used on the trades log.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Envelope fields plus reference-data enrichment. Enrichment fields are
/// `None` on a reference-data miss; the envelope's own fields stay intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTrade {
    pub envelope: TradeEnvelope,
    pub trader_name: Option<String>,
    pub trader_mpid: Option<String>,
    pub trader_crd: Option<String>,
    pub account_type: Option<String>,
    pub strategy_code: Option<String>,
    pub strategy_name: Option<String>,
    pub strategy_type: Option<String>,
    pub cusip: Option<String>,
    pub sedol: Option<String>,
    pub isin: Option<String>,
    pub security_name: Option<String>,
    pub mic: Option<String>,
    pub enrichment_ts: DateTime<Utc>,
}

/// Per-(trader, symbol) running position. Owned exclusively by the
/// hot-path instance holding the owning partition; never shared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub trader_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
    pub total_buy_cost_mantissa: Mantissa,
    pub total_sell_proceeds_mantissa: Mantissa,
    pub realized_pnl_mantissa: Mantissa,
    pub trade_count: u64,
    pub last_update_ts: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(trader_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            trader_id: trader_id.into(),
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Apply one trade. Integer arithmetic only.
    ///
    /// Realized P&L only accrues when closing out of a long position
    /// (`prev > 0 and total_buy_qty > 0`) — see DESIGN.md Open Question 1.
    pub fn apply_trade(&mut self, envelope: &TradeEnvelope) {
        let q = envelope.quantity;
        let cost = q * envelope.price_mantissa;

        match envelope.side {
            Side::Buy => {
                self.quantity += q;
                self.total_buy_qty += q;
                self.total_buy_cost_mantissa += cost;
            }
            Side::Sell | Side::SellShort => {
                let prev = self.quantity;
                self.quantity -= q;
                self.total_sell_qty += q;
                self.total_sell_proceeds_mantissa += cost;
                if prev > 0
                    && self.total_buy_qty > 0
                    && let Some(avg_buy) = avg_price(self.total_buy_cost_mantissa, self.total_buy_qty)
                {
                    self.realized_pnl_mantissa += (envelope.price_mantissa - avg_buy) * q;
                }
            }
        }

        self.trade_count += 1;
        self.last_update_ts = Some(envelope.exec_ts);
    }

    /// Unrealized P&L against a mark price.
    pub fn unrealized_pnl(&self, mark_price_mantissa: Mantissa) -> Mantissa {
        if self.quantity == 0 || self.total_buy_qty == 0 {
            return 0;
        }
        match avg_price(self.total_buy_cost_mantissa, self.total_buy_qty) {
            Some(avg_buy) => (mark_price_mantissa - avg_buy) * self.quantity,
            None => 0,
        }
    }

    pub fn snapshot(&self, mark_price_mantissa: Mantissa, mark_source: MarkSource) -> PositionSnapshot {
        PositionSnapshot {
            position: self.clone(),
            mark_price_mantissa,
            mark_source,
            unrealized_pnl_mantissa: self.unrealized_pnl(mark_price_mantissa),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkSource {
    Official,
    Ltp,
    Mid,
    Stale,
}

/// Immutable value produced on every position update; the unit of work
/// published to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position: Position,
    pub mark_price_mantissa: Mantissa,
    pub mark_source: MarkSource,
    pub unrealized_pnl_mantissa: Mantissa,
}

impl PositionSnapshot {
    pub fn total_pnl(&self) -> Mantissa {
        self.position.realized_pnl_mantissa + self.unrealized_pnl_mantissa
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqReason {
    Deserialization,
    Validation,
    Processing,
    Downstream,
    Timeout,
    Unknown,
}

/// Emitted on terminal failure; consumed by operators only. `payload`
/// preserves the original bytes losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub id: Uuid,
    pub original_topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub service: String,
    pub reason: DlqReason,
    pub error_message: String,
    pub stack: Option<String>,
    pub retry_count: u32,
    pub original_ts: DateTime<Utc>,
    pub dlq_ts: DateTime<Utc>,
    pub metadata: std::collections::HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(side: Side, qty: i64, price: Mantissa) -> TradeEnvelope {
        TradeEnvelope {
            exec_id: "X1".into(),
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
            raw_bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn qa_scenario_1_position_fold() {
        let mut pos = Position::new("T001", "AAPL");
        pos.apply_trade(&envelope(Side::Buy, 100, 15_000_000_000));
        pos.apply_trade(&envelope(Side::Sell, 40, 20_000_000_000));

        assert_eq!(pos.quantity, 60);
        assert_eq!(pos.realized_pnl_mantissa, 200_000_000_000);
        assert_eq!(pos.unrealized_pnl(18_000_000_000), 180_000_000_000);
    }

    #[test]
    fn qa_short_position_accrues_no_realized_pnl() {
        let mut pos = Position::new("T001", "AAPL");
        pos.apply_trade(&envelope(Side::SellShort, 10, 10_000_000_000));
        assert_eq!(pos.realized_pnl_mantissa, 0);
        assert_eq!(pos.quantity, -10);
    }

    #[test]
    fn qa_envelope_roundtrip_encoding() {
        let env = envelope(Side::Buy, 5, 100_000_000);
        let bytes = env.encode().unwrap();
        let decoded = TradeEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.exec_id, env.exec_id);
        assert_eq!(decoded.quantity, env.quantity);
    }
}
