//! Open positions, order requests, and strategy signals.

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Side, SignalKind};

/// A request to open a market position.
///
/// Volume is already normalized to the broker's lot step; stop loss and
/// take profit are final prices, not distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderRequest {
    pub side: Side,
    pub volume: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub comment: String,
}

/// A live position as last reported by the trading terminal.
///
/// The ticket is broker-assigned and unique. The stop loss is mutated
/// in place by trailing updates; per the trailing invariant it only
/// ever moves in the position's favor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    /// Unrealized profit as last reported
    pub profit: Decimal,
    pub comment: String,
    /// When this process first observed the position
    pub opened_at: DateTime<Local>,
}

impl Position {
    /// Signed price movement since entry, positive when in profit.
    pub fn points_in_favor(&self, current: Decimal) -> Decimal {
        match self.side {
            Side::Buy => current - self.price_open,
            Side::Sell => self.price_open - current,
        }
    }

    /// Monetary profit at the given price for this volume and contract size.
    pub fn profit_at(&self, current: Decimal, contract_size: Decimal) -> Decimal {
        self.points_in_favor(current) * self.volume * contract_size
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub reason: String,
    pub at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_position(side: Side) -> Position {
        Position {
            ticket: 42,
            symbol: "XAUUSD".to_string(),
            side,
            volume: dec!(0.03),
            price_open: dec!(2223.57),
            price_current: dec!(2223.57),
            sl: dec!(2195.23),
            tp: dec!(2280.25),
            profit: Decimal::ZERO,
            comment: String::new(),
            opened_at: Local::now(),
        }
    }

    #[test]
    fn test_points_in_favor_buy() {
        let pos = sample_position(Side::Buy);
        assert_eq!(pos.points_in_favor(dec!(2230.57)), dec!(7.00));
        assert_eq!(pos.points_in_favor(dec!(2220.57)), dec!(-3.00));
    }

    #[test]
    fn test_points_in_favor_sell() {
        let pos = sample_position(Side::Sell);
        assert_eq!(pos.points_in_favor(dec!(2220.57)), dec!(3.00));
        assert_eq!(pos.points_in_favor(dec!(2230.57)), dec!(-7.00));
    }

    #[test]
    fn test_profit_at_contract_size() {
        let pos = sample_position(Side::Buy);
        // 7.00 points * 0.03 lots * 100 units = 21.00
        assert_eq!(pos.profit_at(dec!(2230.57), dec!(100)), dec!(21.0000));
    }
}
