//! Market snapshots: ticks, account state, and bars.
//!
//! All three are immutable observations; the newest one wins wherever
//! they are cached.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instantaneous market snapshot for one symbol, as reported by the
/// trading terminal.
///
/// Carries the broker's volume constraints alongside the quote because
/// lot sizing needs them at the same instant the price is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Spread in points
    pub spread: i64,
    /// Broker server time
    pub time: NaiveDateTime,
    /// Smallest price increment (e.g. 0.01 for gold)
    pub point: Decimal,
    /// Price digits after the decimal point
    pub digits: u32,
    /// Units per lot (e.g. 100 oz for gold)
    pub contract_size: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
    pub lot_step: Decimal,
}

impl Tick {
    /// Entry price for a new position on the given side.
    pub fn entry_price(&self, side: crate::Side) -> Decimal {
        if side.is_buy() {
            self.ask
        } else {
            self.bid
        }
    }
}

/// Account state mirror, refreshed with every market-data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    /// Unrealized profit across open positions
    pub profit: Decimal,
    pub leverage: i64,
    pub open_positions: u32,
}

/// One OHLC bar of a fixed timeframe, ascending by time within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_volume: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Side;
    use rust_decimal_macros::dec;

    fn sample_tick() -> Tick {
        Tick {
            symbol: "XAUUSD".to_string(),
            bid: dec!(2223.37),
            ask: dec!(2223.57),
            spread: 20,
            time: chrono::NaiveDate::from_ymd_opt(2024, 4, 2)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            point: dec!(0.01),
            digits: 2,
            contract_size: dec!(100),
            min_lot: dec!(0.01),
            max_lot: dec!(100),
            lot_step: dec!(0.01),
        }
    }

    #[test]
    fn test_entry_price_by_side() {
        let tick = sample_tick();
        assert_eq!(tick.entry_price(Side::Buy), dec!(2223.57));
        assert_eq!(tick.entry_price(Side::Sell), dec!(2223.37));
    }
}
