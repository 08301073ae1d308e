//! Daily trade log files and aggregation queries.

use std::fs;
use std::path::{Path, PathBuf};

use aurum_domain::{CloseReason, TradeRecord, TradeStatus};
use chrono::{DateTime, Days, Local, NaiveDate};
use rust_decimal::Decimal;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};

/// How many days back a close may look for its matching open record.
/// Positions never live longer than this in practice.
const CLOSE_SEARCH_DAYS: u64 = 7;

/// Window for the "last N results" view used by the loss-rate gate.
const RESULT_WINDOW: usize = 10;

/// Aggregated view of one day's records.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    /// Sum of realized P/L over CLOSED records; OPEN records contribute zero
    pub total_realized_pl: Decimal,
    pub trade_count: usize,
    pub closed_count: usize,
    /// Losses counted backward from the most recent close until the
    /// first non-loss
    pub consecutive_losses_from_end: u32,
    /// Realized P/L of the last closes, most recent first, capped at 10
    pub last_results: Vec<Decimal>,
}

/// Human-facing summary of one day, logged at startup and after closes.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStatistics {
    pub date: NaiveDate,
    pub total_trades: usize,
    pub open_trades: usize,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_profit: Decimal,
    /// Percentage of closed trades that won, 0 when nothing closed
    pub win_rate: Decimal,
}

/// Trade ledger over per-day JSON files.
pub struct TradeLedger {
    dir: PathBuf,
}

impl TradeLedger {
    /// Open (or create) the ledger directory `<logs_dir>/trade_logs`.
    pub fn new(logs_dir: impl AsRef<Path>) -> LedgerResult<Self> {
        let dir = logs_dir.as_ref().join("trade_logs");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("trades_{}.json", date.format("%Y_%m_%d")))
    }

    fn read_day(&self, date: NaiveDate) -> LedgerResult<Vec<TradeRecord>> {
        let path = self.file_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rewrite one day's file durably: temp file in the same directory,
    /// fsync, then rename over the old file.
    fn write_day(&self, date: NaiveDate, records: &[TradeRecord]) -> LedgerResult<()> {
        let path = self.file_for(date);
        let tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), records)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| LedgerError::Persist(e.to_string()))?;
        Ok(())
    }

    /// Append a new OPEN record to its entry day's file.
    pub fn log_open(&self, record: TradeRecord) -> LedgerResult<TradeRecord> {
        let date = record.entry_time.date_naive();
        let mut records = self.read_day(date)?;
        records.push(record.clone());
        self.write_day(date, &records)?;

        info!(
            ticket = record.ticket,
            side = %record.side,
            entry = %record.entry_price,
            volume = %record.volume,
            balance = %record.account_balance_at_entry,
            "Trade open logged"
        );
        Ok(record)
    }

    /// Find the OPEN record for a ticket, searching back from `today`.
    pub fn find_open(&self, ticket: i64, today: NaiveDate) -> LedgerResult<Option<TradeRecord>> {
        for days_back in 0..CLOSE_SEARCH_DAYS {
            let date = today - Days::new(days_back);
            let records = self.read_day(date)?;
            if let Some(rec) = records
                .iter()
                .find(|r| r.ticket == ticket && r.status == TradeStatus::Open)
            {
                return Ok(Some(rec.clone()));
            }
        }
        Ok(None)
    }

    /// Close the OPEN record matching the ticket.
    ///
    /// The record stays in its entry day's file; a close after midnight
    /// updates the previous day's file. Closing an already-closed
    /// ticket is a no-op returning the existing record.
    ///
    /// # Errors
    ///
    /// `LedgerError::OpenRecordNotFound` when no record for the ticket
    /// exists in the search window.
    pub fn log_close(
        &self,
        ticket: i64,
        exit_price: Decimal,
        exit_time: DateTime<Local>,
        realized_pl: Decimal,
        reason: CloseReason,
    ) -> LedgerResult<TradeRecord> {
        let today = exit_time.date_naive();

        for days_back in 0..CLOSE_SEARCH_DAYS {
            let date = today - Days::new(days_back);
            let mut records = self.read_day(date)?;

            if let Some(rec) = records.iter_mut().find(|r| r.ticket == ticket) {
                if rec.status == TradeStatus::Closed {
                    debug!(ticket, "Close already recorded, skipping");
                    return Ok(rec.clone());
                }

                rec.apply_close(exit_price, exit_time, realized_pl, reason);
                let closed = rec.clone();
                self.write_day(date, &records)?;

                info!(
                    ticket,
                    exit = %exit_price,
                    realized_pl = %realized_pl,
                    reason = %reason,
                    "Trade close logged"
                );
                return Ok(closed);
            }
        }

        warn!(ticket, "Close requested for unknown ticket");
        Err(LedgerError::OpenRecordNotFound(ticket))
    }

    /// Flag a record whose close could not be confirmed or recorded.
    /// Returns false when the ticket is unknown.
    pub fn mark_requires_manual(&self, ticket: i64, today: NaiveDate) -> LedgerResult<bool> {
        for days_back in 0..CLOSE_SEARCH_DAYS {
            let date = today - Days::new(days_back);
            let mut records = self.read_day(date)?;

            if let Some(rec) = records
                .iter_mut()
                .find(|r| r.ticket == ticket && r.status != TradeStatus::Closed)
            {
                rec.status = TradeStatus::RequiresManual;
                self.write_day(date, &records)?;
                warn!(ticket, "Trade flagged REQUIRES_MANUAL");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether any record in the search window needs operator attention.
    /// New positions are refused while this holds.
    pub fn has_requires_manual(&self, today: NaiveDate) -> LedgerResult<bool> {
        for days_back in 0..CLOSE_SEARCH_DAYS {
            let date = today - Days::new(days_back);
            if self
                .read_day(date)?
                .iter()
                .any(|r| r.status == TradeStatus::RequiresManual)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All records for one day, in append order.
    pub fn trades_for(&self, date: NaiveDate) -> LedgerResult<Vec<TradeRecord>> {
        self.read_day(date)
    }

    /// Aggregate one day's records for the protection gates.
    pub fn daily_aggregate(&self, date: NaiveDate) -> LedgerResult<DailyAggregate> {
        let records = self.read_day(date)?;

        let mut closed: Vec<&TradeRecord> = records.iter().filter(|r| r.is_closed()).collect();
        closed.sort_by_key(|r| r.exit_time);

        let total_realized_pl = closed
            .iter()
            .filter_map(|r| r.realized_pl)
            .sum::<Decimal>();

        let mut consecutive = 0u32;
        for rec in closed.iter().rev() {
            if rec.is_loss() {
                consecutive += 1;
            } else {
                break;
            }
        }

        let last_results: Vec<Decimal> = closed
            .iter()
            .rev()
            .take(RESULT_WINDOW)
            .filter_map(|r| r.realized_pl)
            .collect();

        Ok(DailyAggregate {
            total_realized_pl,
            trade_count: records.len(),
            closed_count: closed.len(),
            consecutive_losses_from_end: consecutive,
            last_results,
        })
    }

    /// Balance captured by the earliest record of the day, if any.
    /// This anchors the daily loss limit.
    pub fn first_trade_balance(&self, date: NaiveDate) -> LedgerResult<Option<Decimal>> {
        let records = self.read_day(date)?;
        Ok(records
            .iter()
            .min_by_key(|r| r.entry_time)
            .map(|r| r.account_balance_at_entry))
    }

    /// Day summary for logs and the external dashboard mirror.
    pub fn daily_statistics(&self, date: NaiveDate) -> LedgerResult<DailyStatistics> {
        let records = self.read_day(date)?;

        let closed: Vec<&TradeRecord> = records.iter().filter(|r| r.is_closed()).collect();
        let winning = closed
            .iter()
            .filter(|r| matches!(r.realized_pl, Some(pl) if pl > Decimal::ZERO))
            .count();
        let losing = closed.iter().filter(|r| r.is_loss()).count();
        let total_profit = closed
            .iter()
            .filter_map(|r| r.realized_pl)
            .sum::<Decimal>();
        let win_rate = if closed.is_empty() {
            Decimal::ZERO
        } else {
            (Decimal::from(winning as u64) * Decimal::ONE_HUNDRED
                / Decimal::from(closed.len() as u64))
            .round_dp(2)
        };

        Ok(DailyStatistics {
            date,
            total_trades: records.len(),
            open_trades: records
                .iter()
                .filter(|r| r.status == TradeStatus::Open)
                .count(),
            closed_trades: closed.len(),
            winning_trades: winning,
            losing_trades: losing,
            total_profit,
            win_rate,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
