//! Fixed-point money representation: signed 64-bit mantissa, scale 10^-8.
//!
//! Grounded on `money.rs`'s `ScaledAmount` newtype and `parse_amount`
//! parsing discipline, simplified to this crate's single fixed scale
//! (the source system prices everything in mantissa units of 10^-8,
//! unlike the teacher's per-asset variable `decimals`).

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// 10^8 — every mantissa value represents `decimal_value * SCALE`.
pub const SCALE: i64 = 100_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FixedPointError {
    #[error("value overflows i64 mantissa range")]
    Overflow,
    #[error("invalid decimal format: {0}")]
    InvalidFormat(String),
}

/// A signed fixed-point quantity in units of 10^-8.
pub type Mantissa = i64;

/// Scale a decimal value to mantissa using banker's rounding
/// (round-half-to-even) at the 8th fractional digit.
pub fn decimal_to_mantissa(value: Decimal) -> Result<Mantissa, FixedPointError> {
    let scaled = value
        .round_dp_with_strategy(8, RoundingStrategy::MidpointNearestEven)
        .checked_mul(Decimal::from(SCALE))
        .ok_or(FixedPointError::Overflow)?;
    scaled.try_into().map_err(|_| FixedPointError::Overflow)
}

/// Parse a decimal string (e.g. "180.00") directly to mantissa.
pub fn parse_mantissa(s: &str) -> Result<Mantissa, FixedPointError> {
    let decimal: Decimal = s
        .parse()
        .map_err(|_| FixedPointError::InvalidFormat(s.to_string()))?;
    decimal_to_mantissa(decimal)
}

/// Format a mantissa back to a decimal string with 8 fractional digits.
pub fn format_mantissa(mantissa: Mantissa) -> String {
    let whole = mantissa / SCALE;
    let frac = (mantissa % SCALE).abs();
    format!("{whole}.{frac:08}")
}

/// Truncated integer division applied only when `denominator >= 1`.
pub fn avg_price(total_cost: Mantissa, total_qty: i64) -> Option<Mantissa> {
    if total_qty < 1 {
        return None;
    }
    Some(total_cost / total_qty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_parse_mantissa_whole_and_fractional() {
        assert_eq!(parse_mantissa("180.00").unwrap(), 18_000_000_000);
        assert_eq!(parse_mantissa("150.00000001").unwrap(), 15_000_000_001);
        assert_eq!(parse_mantissa("0").unwrap(), 0);
    }

    #[test]
    fn qa_parse_mantissa_invalid_format() {
        assert!(parse_mantissa("not-a-number").is_err());
    }

    #[test]
    fn qa_format_mantissa_roundtrip() {
        assert_eq!(format_mantissa(18_000_000_000), "180.00000000");
        assert_eq!(format_mantissa(15_000_000_001), "150.00000001");
    }

    #[test]
    fn qa_banker_rounding_half_to_even() {
        // 1.000000005 rounds to the nearest even 8th digit: 0 is even, stays down.
        let a = decimal_to_mantissa(Decimal::new(1_000000005, 9)).unwrap();
        let b = decimal_to_mantissa(Decimal::new(1_000000015, 9)).unwrap();
        assert_eq!(a, 100_000_000);
        assert_eq!(b, 100_000_002);
    }

    #[test]
    fn qa_avg_price_denominator_guard() {
        assert_eq!(avg_price(1_000, 0), None);
        assert_eq!(avg_price(1_000, 10), Some(100));
    }

    #[test]
    fn qa_scenario_1_arithmetic() {
        // BUY 100@150.00, SELL 40@200.00, mark 180.00
        let buy_px = parse_mantissa("150.00").unwrap();
        let sell_px = parse_mantissa("200.00").unwrap();
        let mark = parse_mantissa("180.00").unwrap();
        let qty_buy = 100i64;
        let qty_sell = 40i64;

        let total_buy_cost = buy_px * qty_buy;
        let realized = (sell_px - buy_px) * qty_sell;
        assert_eq!(realized, 200_000_000_000);

        let remaining_qty = qty_buy - qty_sell;
        let avg_buy = avg_price(total_buy_cost, qty_buy).unwrap();
        let unrealized = (mark - avg_buy) * remaining_qty;
        assert_eq!(unrealized, 180_000_000_000);
    }
}
