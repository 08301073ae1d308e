//! Order executor: broker commands plus durable accounting.
//!
//! Every confirmed open and close flows into the ledger before the
//! call returns. An open that cannot be recorded is immediately closed
//! again — trading without durable accounting is worse than not
//! trading. A close that cannot be confirmed or recorded flags the
//! position REQUIRES_MANUAL, which blocks all further opens.

use std::sync::Arc;
use std::time::Duration;

use aurum_domain::{
    AccountSnapshot, CloseReason, OpenOrderRequest, Position, Tick, TradeRecord,
};
use aurum_ledger::TradeLedger;
use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::error::{ExecError, ExecResult};
use crate::ports::BrokerPort;

/// Maximum close attempts before giving up.
const CLOSE_MAX_ATTEMPTS: u32 = 10;

/// Backoff cap between close attempts.
const CLOSE_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Executes orders through a broker port and keeps the ledger current.
pub struct OrderExecutor<B: BrokerPort> {
    broker: Arc<B>,
    ledger: Arc<TradeLedger>,
}

impl<B: BrokerPort> OrderExecutor<B> {
    pub fn new(broker: Arc<B>, ledger: Arc<TradeLedger>) -> Self {
        Self { broker, ledger }
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Open a position. Single attempt; a timed-out command triggers
    /// one position refresh so the terminal's view is re-reported
    /// before the failure is surfaced.
    pub async fn open(
        &self,
        request: OpenOrderRequest,
        tick: &Tick,
        account: &AccountSnapshot,
        now: DateTime<Local>,
    ) -> ExecResult<Position> {
        info!(
            side = %request.side,
            volume = %request.volume,
            sl = %request.stop_loss,
            tp = %request.take_profit,
            "Placing open order"
        );

        let ack = match self.broker.open_order(&request).await {
            Ok(ack) => ack,
            Err(ExecError::CommandTimeout(msg)) => {
                warn!(%msg, "Open timed out, requesting position refresh to reconcile");
                if let Err(e) = self.broker.refresh_positions().await {
                    warn!(error = %e, "Reconciliation refresh failed");
                }
                return Err(ExecError::CommandTimeout(msg));
            }
            Err(e) => return Err(e),
        };

        let position = Position {
            ticket: ack.ticket,
            symbol: tick.symbol.clone(),
            side: request.side,
            volume: ack.volume,
            price_open: ack.fill_price,
            price_current: ack.fill_price,
            sl: request.stop_loss,
            tp: request.take_profit,
            profit: Decimal::ZERO,
            comment: request.comment.clone(),
            opened_at: now,
        };

        let record = TradeRecord::open(
            ack.ticket,
            tick.symbol.clone(),
            request.side,
            now,
            ack.fill_price,
            ack.volume,
            request.stop_loss,
            request.take_profit,
            tick.contract_size,
            account.balance,
            request.comment,
        );

        if let Err(first) = self.ledger.log_open(record.clone()) {
            warn!(error = %first, "Open could not be logged, retrying once");
            if let Err(second) = self.ledger.log_open(record) {
                error!(
                    ticket = ack.ticket,
                    error = %second,
                    "Open could not be logged, closing position again"
                );
                if let Err(e) = self.broker.close_position(ack.ticket).await {
                    error!(ticket = ack.ticket, error = %e, "Protective close failed");
                }
                return Err(second.into());
            }
        }

        info!(
            ticket = position.ticket,
            fill = %position.price_open,
            "Position opened"
        );
        Ok(position)
    }

    /// Close a position, retrying with bounded backoff because an
    /// unclosed position is dangerous. Exhaustion flags the record
    /// REQUIRES_MANUAL and returns `CloseFailed`.
    pub async fn close(
        &self,
        position: &Position,
        exit_price: Decimal,
        reason: CloseReason,
        now: DateTime<Local>,
    ) -> ExecResult<TradeRecord> {
        let ticket = position.ticket;
        let mut backoff = Duration::from_secs(1);

        for attempt in 1..=CLOSE_MAX_ATTEMPTS {
            match self.broker.close_position(ticket).await {
                Ok(()) => {
                    return self.record_close(ticket, exit_price, reason, now);
                }
                Err(e) => {
                    warn!(
                        ticket,
                        attempt,
                        error = %e,
                        "Close attempt failed"
                    );
                    if attempt < CLOSE_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(CLOSE_BACKOFF_CAP);
                    }
                }
            }
        }

        error!(ticket, "Close retries exhausted, flagging for manual intervention");
        self.ledger.mark_requires_manual(ticket, now.date_naive())?;
        Err(ExecError::CloseFailed {
            ticket,
            attempts: CLOSE_MAX_ATTEMPTS,
        })
    }

    /// Record a close the terminal performed on its own (broker-side
    /// stop or target fill). No command is sent.
    pub fn record_external_close(
        &self,
        ticket: i64,
        exit_price: Decimal,
        reason: CloseReason,
        now: DateTime<Local>,
    ) -> ExecResult<TradeRecord> {
        self.record_close(ticket, exit_price, reason, now)
    }

    fn record_close(
        &self,
        ticket: i64,
        exit_price: Decimal,
        reason: CloseReason,
        now: DateTime<Local>,
    ) -> ExecResult<TradeRecord> {
        let record = match self.ledger.find_open(ticket, now.date_naive())? {
            Some(record) => record,
            None => {
                // Close confirmed but no open record: accounting is
                // broken for this ticket, refuse further trading
                self.ledger.mark_requires_manual(ticket, now.date_naive())?;
                return Err(ExecError::Ledger(
                    aurum_ledger::LedgerError::OpenRecordNotFound(ticket),
                ));
            }
        };

        let realized_pl = record.profit_at(exit_price);
        match self
            .ledger
            .log_close(ticket, exit_price, now, realized_pl, reason)
        {
            Ok(closed) => {
                info!(
                    ticket,
                    exit = %exit_price,
                    realized_pl = %realized_pl,
                    reason = %reason,
                    "Position closed"
                );
                Ok(closed)
            }
            Err(e) => {
                error!(ticket, error = %e, "Confirmed close could not be logged");
                self.ledger.mark_requires_manual(ticket, now.date_naive())?;
                Err(e.into())
            }
        }
    }

    /// Move the stop/target of an open position. Single attempt; the
    /// caller decides whether a failure matters.
    pub async fn modify(&self, ticket: i64, sl: Decimal, tp: Decimal) -> ExecResult<()> {
        match self.broker.modify_position(ticket, sl, tp).await {
            Ok(()) => {
                info!(ticket, sl = %sl, tp = %tp, "Position modified");
                Ok(())
            }
            Err(e) => {
                warn!(ticket, error = %e, "Modify failed");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
