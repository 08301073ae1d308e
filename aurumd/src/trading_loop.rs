//! Trading loop state machine.
//!
//! ```text
//! WAITING_FOR_SIGNAL → OPENING → MONITORING → CLOSED → WAITING_FOR_SIGNAL
//! ```
//!
//! In WAITING_FOR_SIGNAL the loop requires, in order: a CONNECTED
//! bridge, a fresh tick on an accepted symbol, a seen account
//! snapshot, no REQUIRES_MANUAL record outstanding, a green circuit
//! breaker, and a warm bar window. Only then is a signal computed and
//! sized. Failures on the way to OPENING log and fall back to
//! waiting; protection trips park the loop until the pause expires.

use std::sync::Arc;
use std::time::Duration;

use aurum_bridge::{ConnectionState, MarketDataCache};
use aurum_domain::{OpenOrderRequest, Position, Signal, TradeIntent};
use aurum_engine::{
    check_margin, compute_sar, derive_take_profit, evaluate_signal, position_size, risk_summary,
    LotConstraints, SarParams,
};
use aurum_exec::{BrokerPort, OrderExecutor};
use aurum_ledger::TradeLedger;
use aurum_protect::CircuitBreaker;
use chrono::Local;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};
use crate::monitor::{MonitorOutcome, MonitorSettings, PositionMonitor};

/// How long a shutdown-time close may take before the position is
/// flagged for manual handling.
const SHUTDOWN_CLOSE_WINDOW: Duration = Duration::from_secs(15);

/// Trading loop settings.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub intent: TradeIntent,
    pub risk_percentage: Decimal,
    pub signal_interval: Duration,
    pub tick_ttl: Duration,
    pub sar: SarParams,
    pub timeframe_minutes: u32,
    pub history_bars: u32,
    pub warmup_bars: usize,
    /// Accepted symbol aliases, uppercase
    pub symbol_aliases: Vec<String>,
    pub order_comment: String,
}

/// Final state of the loop at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    /// At least one position could not be closed or recorded
    RequiresManual,
}

struct TradePlan {
    request: OpenOrderRequest,
    tick: aurum_domain::Tick,
    account: aurum_domain::AccountSnapshot,
}

/// The daemon's central state machine.
pub struct TradingLoop<B: BrokerPort> {
    settings: LoopSettings,
    monitor_settings: MonitorSettings,
    broker: Arc<B>,
    executor: Arc<OrderExecutor<B>>,
    cache: Arc<MarketDataCache>,
    breaker: Arc<tokio::sync::Mutex<CircuitBreaker>>,
    bus: Arc<EventBus>,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl<B: BrokerPort> TradingLoop<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: LoopSettings,
        monitor_settings: MonitorSettings,
        broker: Arc<B>,
        executor: Arc<OrderExecutor<B>>,
        cache: Arc<MarketDataCache>,
        breaker: Arc<tokio::sync::Mutex<CircuitBreaker>>,
        bus: Arc<EventBus>,
        connection: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            monitor_settings,
            broker,
            executor,
            cache,
            breaker,
            bus,
            connection,
            cancel,
        }
    }

    /// Run until shutdown. Returns whether any position was left for
    /// manual handling.
    pub async fn run(self) -> DaemonResult<ExitStatus> {
        info!(
            intent = %self.settings.intent,
            risk_pct = %self.settings.risk_percentage,
            "Trading loop started"
        );
        let mut requires_manual = false;

        loop {
            // WAITING_FOR_SIGNAL
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.signal_interval) => {}
            }

            let plan = match self.evaluate().await {
                Ok(Some(plan)) => plan,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Signal evaluation failed");
                    continue;
                }
            };

            // OPENING
            let position = match self
                .executor
                .open(plan.request, &plan.tick, &plan.account, Local::now())
                .await
            {
                Ok(position) => position,
                Err(e) => {
                    warn!(error = %e, "Open failed, returning to signal wait");
                    continue;
                }
            };
            self.bus.publish(DaemonEvent::PositionOpened {
                ticket: position.ticket,
                side: position.side,
                volume: position.volume,
                entry: position.price_open,
            });

            // MONITORING
            let monitor = PositionMonitor::new(
                self.broker.clone(),
                self.executor.clone(),
                self.cache.clone(),
                self.bus.clone(),
                self.monitor_settings.clone(),
                self.cancel.clone(),
            );
            match monitor.run(position).await? {
                MonitorOutcome::Closed(record) => {
                    // CLOSED: protection re-evaluates before the next wait
                    let balance = self
                        .cache
                        .latest_account()
                        .map(|a| a.balance)
                        .unwrap_or(record.account_balance_at_entry);
                    let (_, notice) = self
                        .breaker
                        .lock()
                        .await
                        .on_trade_closed(Local::now(), balance)?;
                    if let Some(notice) = notice {
                        self.bus.publish(DaemonEvent::ProtectionPause {
                            reason: notice.reason,
                            until: notice.until,
                        });
                    }
                }
                MonitorOutcome::RequiresManual { ticket } => {
                    error!(ticket, "Position requires manual handling");
                    requires_manual = true;
                }
                MonitorOutcome::Cancelled { position } => {
                    requires_manual |= self.shutdown_close(position).await;
                    break;
                }
            }
        }

        let flagged = self
            .ledger()
            .has_requires_manual(Local::now().date_naive())?;
        if requires_manual || flagged {
            Ok(ExitStatus::RequiresManual)
        } else {
            Ok(ExitStatus::Clean)
        }
    }

    fn ledger(&self) -> &TradeLedger {
        self.executor.ledger()
    }

    /// One WAITING_FOR_SIGNAL evaluation. `None` means keep waiting.
    async fn evaluate(&self) -> DaemonResult<Option<TradePlan>> {
        if *self.connection.borrow() != ConnectionState::Connected {
            debug!("Bridge not connected");
            return Ok(None);
        }

        let Some(tick) = self.cache.fresh_tick(self.settings.tick_ttl) else {
            debug!("No fresh tick");
            return Ok(None);
        };
        if !self.symbol_accepted(&tick.symbol) {
            warn!(symbol = %tick.symbol, "Reported symbol not in the accepted list");
            return Ok(None);
        }
        let Some(account) = self.cache.latest_account() else {
            debug!("No account snapshot yet");
            return Ok(None);
        };

        let now = Local::now();
        if self.ledger().has_requires_manual(now.date_naive())? {
            warn!("Unresolved manual-intervention record, refusing to open");
            return Ok(None);
        }

        let (verdict, notice) = self.breaker.lock().await.check(now, account.balance)?;
        if let Some(notice) = notice {
            self.bus.publish(DaemonEvent::ProtectionPause {
                reason: notice.reason,
                until: notice.until,
            });
        }
        if let aurum_protect::Verdict::Paused { reason, until } = verdict {
            debug!(%reason, until = %until, "Protection pause active");
            return Ok(None);
        }

        let bars = match self
            .broker
            .fetch_bars(self.settings.history_bars, self.settings.timeframe_minutes)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(error = %e, "Bar fetch failed");
                match self
                    .cache
                    .bars(&tick.symbol, self.settings.timeframe_minutes)
                {
                    Some(cached) => cached,
                    None => return Ok(None),
                }
            }
        };
        if bars.len() < self.settings.warmup_bars {
            debug!(
                got = bars.len(),
                need = self.settings.warmup_bars,
                "Bar window still warming up"
            );
            return Ok(None);
        }

        let reading = compute_sar(self.settings.sar, &bars)?;
        let signal = evaluate_signal(&reading, self.settings.intent, now);
        let Some(side) = signal.kind.side() else {
            debug!(reason = %signal.reason, "No actionable signal");
            return Ok(None);
        };
        self.emit_signal(&signal);

        // Stop at the SAR level, target at twice the stop distance
        let entry = tick.entry_price(side);
        let stop_loss = reading.sar.round_dp(tick.digits);
        let constraints = LotConstraints::from(&tick);

        let volume = match position_size(
            account.balance,
            self.settings.risk_percentage,
            entry,
            stop_loss,
            side,
            &constraints,
        ) {
            Ok(volume) => volume,
            Err(e) => {
                warn!(error = %e, "Risk check rejected the open");
                return Ok(None);
            }
        };
        let take_profit = match derive_take_profit(entry, stop_loss, side, tick.digits) {
            Ok(tp) => tp,
            Err(e) => {
                warn!(error = %e, "Target derivation rejected the open");
                return Ok(None);
            }
        };
        if let Err(e) = check_margin(
            volume,
            entry,
            tick.contract_size,
            account.leverage,
            account.free_margin,
        ) {
            warn!(error = %e, "Margin check rejected the open");
            return Ok(None);
        }

        let summary = risk_summary(entry, stop_loss, take_profit, volume, side, tick.contract_size);
        info!(
            side = %side,
            entry = %summary.entry,
            sl = %summary.stop_loss,
            tp = %summary.take_profit,
            volume = %summary.volume,
            risk_amount = %summary.risk_amount,
            reward_amount = %summary.reward_amount,
            "Trade plan ready"
        );

        Ok(Some(TradePlan {
            request: OpenOrderRequest {
                side,
                volume,
                stop_loss,
                take_profit,
                comment: self.settings.order_comment.clone(),
            },
            tick,
            account,
        }))
    }

    fn emit_signal(&self, signal: &Signal) {
        self.bus.publish(DaemonEvent::SignalDetected {
            kind: signal.kind,
            reason: signal.reason.clone(),
        });
    }

    fn symbol_accepted(&self, symbol: &str) -> bool {
        let upper = symbol.to_uppercase();
        self.settings
            .symbol_aliases
            .iter()
            .any(|alias| *alias == upper)
    }

    /// Shutdown with an open position: one bounded close attempt, then
    /// flag for manual handling. Returns true when manual handling is
    /// needed.
    async fn shutdown_close(&self, position: Position) -> bool {
        info!(
            ticket = position.ticket,
            "Shutdown requested with open position, closing"
        );

        let exit_price = self
            .cache
            .latest_tick()
            .map(|t| if position.side.is_buy() { t.bid } else { t.ask })
            .unwrap_or(position.price_current);

        let close = self.executor.close(
            &position,
            exit_price,
            aurum_domain::CloseReason::Manual,
            Local::now(),
        );
        match tokio::time::timeout(SHUTDOWN_CLOSE_WINDOW, close).await {
            Ok(Ok(record)) => {
                info!(
                    ticket = position.ticket,
                    realized_pl = %record.realized_pl.unwrap_or_default(),
                    "Position closed at shutdown"
                );
                false
            }
            Ok(Err(e)) => {
                error!(ticket = position.ticket, error = %e, "Shutdown close failed");
                true
            }
            Err(_) => {
                error!(ticket = position.ticket, "Shutdown close timed out");
                if let Err(e) = self
                    .ledger()
                    .mark_requires_manual(position.ticket, Local::now().date_naive())
                {
                    error!(error = %e, "Could not flag position for manual handling");
                }
                true
            }
        }
    }
}
