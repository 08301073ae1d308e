//! Persistent trade records.
//!
//! One record per position lifetime, written at open and updated in
//! place at close. Records are the authoritative source for realized
//! P/L attribution and daily-balance anchoring, so the entry snapshot
//! captures the account balance at the moment the order was sent.

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{CloseReason, Side};

/// Lifecycle state of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
    /// A close could not be confirmed or durably recorded; the position
    /// needs operator attention and no new trades may open until then.
    RequiresManual,
}

/// A single trade, from open to close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub record_id: Uuid,
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub status: TradeStatus,

    // Entry
    pub entry_time: DateTime<Local>,
    pub entry_price: Decimal,
    pub volume: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Units per lot at entry time, kept so realized P/L can be
    /// derived without a live quote
    pub contract_size: Decimal,
    pub account_balance_at_entry: Decimal,
    pub comment: String,

    // Exit (filled on close)
    pub exit_time: Option<DateTime<Local>>,
    pub exit_price: Option<Decimal>,
    pub realized_pl: Option<Decimal>,
    /// Signed price movement captured at close
    pub realized_points: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
    pub duration_secs: Option<i64>,
}

impl TradeRecord {
    /// Create a new OPEN record.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        ticket: i64,
        symbol: String,
        side: Side,
        entry_time: DateTime<Local>,
        entry_price: Decimal,
        volume: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        contract_size: Decimal,
        account_balance_at_entry: Decimal,
        comment: String,
    ) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            ticket,
            symbol,
            side,
            status: TradeStatus::Open,
            entry_time,
            entry_price,
            volume,
            stop_loss,
            take_profit,
            contract_size,
            account_balance_at_entry,
            comment,
            exit_time: None,
            exit_price: None,
            realized_pl: None,
            realized_points: None,
            close_reason: None,
            duration_secs: None,
        }
    }

    /// Fill in the exit half of the record and mark it CLOSED.
    pub fn apply_close(
        &mut self,
        exit_price: Decimal,
        exit_time: DateTime<Local>,
        realized_pl: Decimal,
        reason: CloseReason,
    ) {
        let points = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };

        self.status = TradeStatus::Closed;
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
        self.realized_pl = Some(realized_pl);
        self.realized_points = Some(points);
        self.close_reason = Some(reason);
        self.duration_secs = Some((exit_time - self.entry_time).num_seconds());
    }

    /// Realized P/L this record would have at the given exit price.
    pub fn profit_at(&self, exit_price: Decimal) -> Decimal {
        let points = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };
        points * self.volume * self.contract_size
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    pub fn is_loss(&self) -> bool {
        matches!(self.realized_pl, Some(pl) if pl < Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_open() -> TradeRecord {
        TradeRecord::open(
            1001,
            "XAUUSD".to_string(),
            Side::Buy,
            Local::now(),
            dec!(2223.57),
            dec!(0.03),
            dec!(2195.23),
            dec!(2280.25),
            dec!(100),
            dec!(10000),
            "sar trend entry".to_string(),
        )
    }

    #[test]
    fn test_open_record_has_no_exit() {
        let rec = sample_open();
        assert_eq!(rec.status, TradeStatus::Open);
        assert!(rec.exit_time.is_none());
        assert!(rec.realized_pl.is_none());
        assert!(!rec.is_loss());
    }

    #[test]
    fn test_apply_close_buy() {
        let mut rec = sample_open();
        let exit = dec!(2230.00);
        let pl = rec.profit_at(exit);
        rec.apply_close(exit, Local::now(), pl, CloseReason::SarReversal);

        assert_eq!(rec.status, TradeStatus::Closed);
        assert_eq!(rec.exit_price, Some(exit));
        // (2230.00 - 2223.57) * 0.03 * 100 = 19.29
        assert_eq!(rec.realized_pl, Some(dec!(19.29)));
        assert_eq!(rec.realized_points, Some(dec!(6.43)));
        assert_eq!(rec.close_reason, Some(CloseReason::SarReversal));
        assert!(!rec.is_loss());
    }

    #[test]
    fn test_loss_detection() {
        let mut rec = sample_open();
        let exit = dec!(2195.23);
        let pl = rec.profit_at(exit);
        rec.apply_close(exit, Local::now(), pl, CloseReason::SlHit);

        assert!(rec.is_loss());
        assert!(rec.realized_pl.unwrap() < Decimal::ZERO);
    }
}
