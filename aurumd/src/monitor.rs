//! Position monitor.
//!
//! Runs while exactly one position is open. Each cycle refreshes the
//! terminal's position view, recomputes the trend on cached or fresh
//! bars, and applies the exit rules in order:
//!
//! 1. trend flipped against the position → close (`SAR_REVERSAL`)
//! 2. price through the stop while the position still exists → close
//!    (`EMERGENCY_SL`) — covers a broker stop that did not fire on a
//!    gap or slippage
//! 3. position vanished from the terminal → the broker closed it;
//!    infer `TP_HIT` vs `SL_HIT` from which level the last price is
//!    nearer to, and record the close without sending a command
//!
//! When no exit applies, the stop trails the SAR level, moving only in
//! the position's favor and only when the change exceeds one point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aurum_bridge::MarketDataCache;
use aurum_domain::{Bar, CloseReason, Position, Side, Tick, TradeRecord};
use aurum_engine::{compute_sar, SarParams, SarReading};
use aurum_exec::{BrokerPort, ExecError, OrderExecutor};
use chrono::Local;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};

/// Monitor cadence and indicator settings.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub tick_ttl: Duration,
    /// Minimum age before the bar window is re-fetched
    pub bar_refresh: Duration,
    pub sar: SarParams,
    pub timeframe_minutes: u32,
    pub history_bars: u32,
}

/// How a monitoring session ended.
#[derive(Debug)]
pub enum MonitorOutcome {
    /// Position closed and recorded
    Closed(TradeRecord),
    /// Close could not be confirmed or recorded; trading must stop
    RequiresManual { ticket: i64 },
    /// Shutdown requested while the position is still open
    Cancelled { position: Position },
}

/// Watches one open position until it closes.
pub struct PositionMonitor<B: BrokerPort> {
    broker: Arc<B>,
    executor: Arc<OrderExecutor<B>>,
    cache: Arc<MarketDataCache>,
    bus: Arc<EventBus>,
    settings: MonitorSettings,
    cancel: CancellationToken,
}

impl<B: BrokerPort> PositionMonitor<B> {
    pub fn new(
        broker: Arc<B>,
        executor: Arc<OrderExecutor<B>>,
        cache: Arc<MarketDataCache>,
        bus: Arc<EventBus>,
        settings: MonitorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            broker,
            executor,
            cache,
            bus,
            settings,
            cancel,
        }
    }

    /// Monitor until the position closes, fails over to manual
    /// handling, or shutdown is requested.
    pub async fn run(&self, mut position: Position) -> DaemonResult<MonitorOutcome> {
        info!(
            ticket = position.ticket,
            side = %position.side,
            entry = %position.price_open,
            sl = %position.sl,
            tp = %position.tp,
            "Monitoring position"
        );

        let mut bars: Vec<Bar> = Vec::new();
        let mut last_bar_fetch: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ok(MonitorOutcome::Cancelled { position });
                }
                _ = tokio::time::sleep(self.settings.check_interval) => {}
            }

            let Some(tick) = self.cache.fresh_tick(self.settings.tick_ttl) else {
                debug!(ticket = position.ticket, "Tick stale, skipping cycle");
                continue;
            };

            // Ask the terminal to re-report positions; a missing ticket
            // means the broker already closed this one.
            let live = match self.broker.refresh_positions().await {
                Ok(live) => live,
                Err(e) => {
                    warn!(error = %e, "Position refresh failed");
                    continue;
                }
            };
            let mark = mark_price(&position.side, &tick);
            if !live.contains(&position.ticket) {
                return self.record_broker_exit(&position, mark);
            }

            position.price_current = mark;
            position.profit = position.profit_at(mark, tick.contract_size);

            // Bars refresh at most once per bar period
            let stale = last_bar_fetch.map_or(true, |t| t.elapsed() >= self.settings.bar_refresh);
            if stale {
                match self
                    .broker
                    .fetch_bars(self.settings.history_bars, self.settings.timeframe_minutes)
                    .await
                {
                    Ok(fresh) if fresh.len() >= 2 => {
                        bars = fresh;
                        last_bar_fetch = Some(Instant::now());
                    }
                    Ok(_) => debug!("Bar fetch returned too little history"),
                    Err(e) => {
                        warn!(error = %e, "Bar fetch failed, reusing cached window");
                        if let Some(cached) = self
                            .cache
                            .bars(&position.symbol, self.settings.timeframe_minutes)
                        {
                            if cached.len() >= 2 {
                                bars = cached;
                            }
                        }
                    }
                }
            }
            if bars.len() < 2 {
                continue;
            }

            let reading = match compute_sar(self.settings.sar, &bars) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(error = %e, "Indicator computation failed");
                    continue;
                }
            };

            // Exit 1: trend flipped against the position
            if !reading.trend.supports(position.side) {
                info!(
                    ticket = position.ticket,
                    trend = %reading.trend,
                    "Trend reversal, closing position"
                );
                return self
                    .close_now(&position, mark, CloseReason::SarReversal)
                    .await;
            }

            // Exit 2: price through the stop but position still open
            let stop_breached = match position.side {
                Side::Buy => position.sl > Decimal::ZERO && tick.bid <= position.sl,
                Side::Sell => position.sl > Decimal::ZERO && tick.ask >= position.sl,
            };
            if stop_breached {
                warn!(
                    ticket = position.ticket,
                    sl = %position.sl,
                    bid = %tick.bid,
                    ask = %tick.ask,
                    "Stop level breached without broker fill, closing"
                );
                return self
                    .close_now(&position, mark, CloseReason::EmergencySl)
                    .await;
            }

            // Trailing stop: follow the SAR, favorable direction only,
            // and only when the move exceeds one point
            self.trail_stop(&mut position, &reading, &tick).await;
        }
    }

    async fn trail_stop(&self, position: &mut Position, reading: &SarReading, tick: &Tick) {
        let candidate = reading.sar.round_dp(tick.digits);
        let should_move = match position.side {
            Side::Buy => candidate > position.sl + tick.point,
            Side::Sell => candidate < position.sl - tick.point,
        };
        if !should_move {
            return;
        }

        match self
            .executor
            .modify(position.ticket, candidate, position.tp)
            .await
        {
            Ok(()) => {
                self.bus.publish(DaemonEvent::TrailingStopMoved {
                    ticket: position.ticket,
                    from: position.sl,
                    to: candidate,
                });
                position.sl = candidate;
            }
            Err(e) => {
                // A failed modify does not abort monitoring
                warn!(ticket = position.ticket, error = %e, "Trailing update failed");
            }
        }
    }

    async fn close_now(
        &self,
        position: &Position,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> DaemonResult<MonitorOutcome> {
        match self
            .executor
            .close(position, exit_price, reason, Local::now())
            .await
        {
            Ok(record) => {
                self.bus.publish(DaemonEvent::PositionClosed {
                    ticket: position.ticket,
                    reason,
                    realized_pl: record.realized_pl.unwrap_or_default(),
                });
                Ok(MonitorOutcome::Closed(record))
            }
            Err(ExecError::CloseFailed { ticket, .. }) => {
                Ok(MonitorOutcome::RequiresManual { ticket })
            }
            Err(e) => {
                warn!(ticket = position.ticket, error = %e, "Close could not be recorded");
                Ok(MonitorOutcome::RequiresManual {
                    ticket: position.ticket,
                })
            }
        }
    }

    fn record_broker_exit(
        &self,
        position: &Position,
        last_price: Decimal,
    ) -> DaemonResult<MonitorOutcome> {
        let reason = infer_broker_exit(position, last_price);
        info!(
            ticket = position.ticket,
            reason = %reason,
            last_price = %last_price,
            "Position no longer reported by terminal"
        );

        match self
            .executor
            .record_external_close(position.ticket, last_price, reason, Local::now())
        {
            Ok(record) => {
                self.bus.publish(DaemonEvent::PositionClosed {
                    ticket: position.ticket,
                    reason,
                    realized_pl: record.realized_pl.unwrap_or_default(),
                });
                Ok(MonitorOutcome::Closed(record))
            }
            Err(e) => {
                warn!(ticket = position.ticket, error = %e, "Broker exit could not be recorded");
                Ok(MonitorOutcome::RequiresManual {
                    ticket: position.ticket,
                })
            }
        }
    }
}

fn mark_price(side: &Side, tick: &Tick) -> Decimal {
    match side {
        Side::Buy => tick.bid,
        Side::Sell => tick.ask,
    }
}

/// A vanished position was closed broker-side; the nearer of TP and SL
/// to the last price names the trigger.
fn infer_broker_exit(position: &Position, last_price: Decimal) -> CloseReason {
    let to_tp = (last_price - position.tp).abs();
    let to_sl = (last_price - position.sl).abs();
    if to_tp <= to_sl {
        CloseReason::TpHit
    } else {
        CloseReason::SlHit
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_domain::{AccountSnapshot, OpenOrderRequest, TradeStatus};
    use aurum_exec::StubBroker;
    use aurum_ledger::TradeLedger;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn tick_at(bid: Decimal, ask: Decimal) -> Tick {
        Tick {
            symbol: "XAUUSD".to_string(),
            bid,
            ask,
            spread: 20,
            time: NaiveDate::from_ymd_opt(2024, 4, 2)
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

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            balance: dec!(10000),
            equity: dec!(10000),
            margin: Decimal::ZERO,
            free_margin: dec!(10000),
            profit: Decimal::ZERO,
            leverage: 100,
            open_positions: 0,
        }
    }

    fn uptrend_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        let base = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let level = start + i as f64 * step;
                Bar {
                    time: base + chrono::Duration::minutes(15 * i as i64),
                    open: Decimal::try_from(level).unwrap(),
                    high: Decimal::try_from(level + 2.0).unwrap(),
                    low: Decimal::try_from(level - 1.0).unwrap(),
                    close: Decimal::try_from(level + 1.5).unwrap(),
                    tick_volume: 100,
                }
            })
            .collect()
    }

    fn flipped_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        let mut bars = uptrend_bars(n, start, step);
        let last = bars.last().unwrap().clone();
        let crash_low = last.low - Decimal::from(40);
        bars.push(Bar {
            time: last.time + chrono::Duration::minutes(15),
            open: last.close,
            high: last.close,
            low: crash_low,
            close: crash_low + Decimal::ONE,
            tick_volume: 100,
        });
        bars
    }

    struct Fixture {
        _dir: TempDir,
        broker: Arc<StubBroker>,
        executor: Arc<OrderExecutor<StubBroker>>,
        cache: Arc<MarketDataCache>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(TradeLedger::new(dir.path()).unwrap());
        let broker = Arc::new(StubBroker::new(dec!(2240.20)));
        let executor = Arc::new(OrderExecutor::new(broker.clone(), ledger));
        Fixture {
            _dir: dir,
            broker,
            executor,
            cache: Arc::new(MarketDataCache::new()),
            bus: Arc::new(EventBus::new(64)),
            cancel: CancellationToken::new(),
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_millis(10),
            tick_ttl: Duration::from_secs(60),
            bar_refresh: Duration::from_millis(0),
            sar: SarParams::default(),
            timeframe_minutes: 15,
            history_bars: 100,
        }
    }

    fn monitor(f: &Fixture) -> PositionMonitor<StubBroker> {
        PositionMonitor::new(
            f.broker.clone(),
            f.executor.clone(),
            f.cache.clone(),
            f.bus.clone(),
            settings(),
            f.cancel.clone(),
        )
    }

    async fn open_buy(f: &Fixture, tick: &Tick) -> Position {
        f.executor
            .open(
                OpenOrderRequest {
                    side: Side::Buy,
                    volume: dec!(0.17),
                    stop_loss: dec!(2234.50),
                    take_profit: dec!(2251.60),
                    comment: String::new(),
                },
                tick,
                &account(),
                Local::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reversal_closes_position() {
        let f = fixture();
        let tick = tick_at(dec!(2240.00), dec!(2240.20));
        f.cache.record_market_data(tick.clone(), account());

        // Trend flips on the very first monitored window
        f.broker.push_bars(flipped_bars(60, 2150.0, 1.5));

        let position = open_buy(&f, &tick).await;
        let outcome = monitor(&f).run(position).await.unwrap();

        match outcome {
            MonitorOutcome::Closed(record) => {
                assert_eq!(record.close_reason, Some(CloseReason::SarReversal));
                assert_eq!(record.status, TradeStatus::Closed);
                // Closed at the bid: (2240.00 - 2240.20) * 0.17 * 100
                assert_eq!(record.realized_pl, Some(dec!(-3.40)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(f.broker.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_trailing_raises_stop_then_reversal() {
        let f = fixture();
        let tick = tick_at(dec!(2240.00), dec!(2240.20));
        f.cache.record_market_data(tick.clone(), account());

        // First window trends up (stop trails upward), second flips
        f.broker.push_bars(uptrend_bars(60, 2150.0, 1.5));
        f.broker.push_bars(flipped_bars(61, 2150.0, 1.5));

        let mut position = open_buy(&f, &tick).await;
        position.sl = dec!(2200.00); // stop well below the current SAR
        let outcome = monitor(&f).run(position).await.unwrap();

        let modifies = f.broker.modifies();
        assert!(!modifies.is_empty(), "expected a trailing MODIFY");
        let (_, new_sl, _) = modifies[0];
        assert!(new_sl > dec!(2200.00), "stop must only move up for a BUY");

        assert!(matches!(outcome, MonitorOutcome::Closed(_)));
    }

    #[tokio::test]
    async fn test_no_modify_within_one_point() {
        let f = fixture();
        let tick = tick_at(dec!(2240.00), dec!(2240.20));
        f.cache.record_market_data(tick.clone(), account());

        f.broker.push_bars(uptrend_bars(60, 2150.0, 1.5));
        f.broker.push_bars(flipped_bars(61, 2150.0, 1.5));

        let mut position = open_buy(&f, &tick).await;
        // Compute where the SAR sits and park the stop within one point
        let reading = compute_sar(SarParams::default(), &uptrend_bars(60, 2150.0, 1.5)).unwrap();
        position.sl = reading.sar.round_dp(2);

        let outcome = monitor(&f).run(position).await.unwrap();
        assert!(matches!(outcome, MonitorOutcome::Closed(_)));
        assert!(
            f.broker.modifies().is_empty(),
            "a change within one point must not be sent"
        );
    }

    #[tokio::test]
    async fn test_emergency_stop_fires() {
        let f = fixture();
        // Bid collapses to the stop while the position still exists
        let tick = tick_at(dec!(2234.40), dec!(2234.60));
        f.cache.record_market_data(tick.clone(), account());

        f.broker.push_bars(uptrend_bars(60, 2150.0, 1.5));

        let position = open_buy(&f, &tick).await;
        // position.sl == 2234.50 >= bid 2234.40
        let outcome = monitor(&f).run(position).await.unwrap();

        match outcome {
            MonitorOutcome::Closed(record) => {
                assert_eq!(record.close_reason, Some(CloseReason::EmergencySl));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broker_exit_inferred_from_levels() {
        let f = fixture();
        let tick = tick_at(dec!(2251.40), dec!(2251.60));
        f.cache.record_market_data(tick.clone(), account());
        f.broker.push_bars(uptrend_bars(60, 2150.0, 1.5));

        let position = open_buy(&f, &tick).await;
        // The broker filled the take profit: ticket vanishes
        f.broker.set_live_tickets(vec![]);

        let outcome = monitor(&f).run(position).await.unwrap();
        match outcome {
            MonitorOutcome::Closed(record) => {
                assert_eq!(record.close_reason, Some(CloseReason::TpHit));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // No CLOSE command was sent for a broker-side exit
        assert_eq!(f.broker.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_returns_position() {
        let f = fixture();
        let tick = tick_at(dec!(2240.00), dec!(2240.20));
        f.cache.record_market_data(tick.clone(), account());
        f.broker.push_bars(uptrend_bars(60, 2150.0, 1.5));

        let position = open_buy(&f, &tick).await;
        let ticket = position.ticket;

        let mon = monitor(&f);
        let cancel = f.cancel.clone();
        let task = tokio::spawn(async move { mon.run(position).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        match task.await.unwrap().unwrap() {
            MonitorOutcome::Cancelled { position } => assert_eq!(position.ticket, ticket),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_infer_broker_exit_levels() {
        let position = Position {
            ticket: 1,
            symbol: "XAUUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.03),
            price_open: dec!(2240.20),
            price_current: dec!(2240.20),
            sl: dec!(2234.50),
            tp: dec!(2251.60),
            profit: Decimal::ZERO,
            comment: String::new(),
            opened_at: Local::now(),
        };

        assert_eq!(infer_broker_exit(&position, dec!(2251.00)), CloseReason::TpHit);
        assert_eq!(infer_broker_exit(&position, dec!(2235.00)), CloseReason::SlHit);
    }
}
