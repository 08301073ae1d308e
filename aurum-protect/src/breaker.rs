//! Circuit breaker: pause trading on loss patterns.
//!
//! Gates are evaluated in a fixed order before every intended open,
//! after every recorded close, and once at startup:
//!
//! 1. day rollover — clears the pause and the consecutive-loss count
//! 2. an active pause denies trading until its end time
//! 3. daily loss limit — today's realized P/L against the balance of
//!    the day's first trade (or the live balance before any trade)
//! 4. consecutive losses, higher tier first (8 → 5 h, 5 → 3 h); the
//!    higher tier extends a still-running lower-tier pause instead of
//!    replacing it
//! 5. loss rate over the last 10 closed trades (≥70% → 5 h)
//!
//! A day with zero closed trades can never trip any gate.

use std::path::PathBuf;
use std::sync::Arc;

use aurum_ledger::TradeLedger;
use chrono::{DateTime, Duration, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ProtectResult;
use crate::state::CircuitBreakerState;

/// Consecutive-loss and loss-rate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub consecutive_loss_threshold_1: u32,
    pub consecutive_loss_pause_hours_1: i64,
    pub consecutive_loss_threshold_2: u32,
    pub consecutive_loss_pause_hours_2: i64,
    pub loss_rate_window: usize,
    pub loss_rate_threshold_pct: Decimal,
    pub loss_rate_pause_hours: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consecutive_loss_threshold_1: 5,
            consecutive_loss_pause_hours_1: 3,
            consecutive_loss_threshold_2: 8,
            consecutive_loss_pause_hours_2: 5,
            loss_rate_window: 10,
            loss_rate_threshold_pct: Decimal::from(70),
            loss_rate_pause_hours: 5,
        }
    }
}

/// Daily loss limit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLossConfig {
    pub enabled: bool,
    pub max_daily_loss_percentage: Decimal,
    pub max_daily_loss_dollars: Decimal,
    /// Selects the percentage limit over the fixed-dollar limit
    pub use_percentage: bool,
}

impl Default for DailyLossConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_loss_percentage: Decimal::from(5),
            max_daily_loss_dollars: Decimal::from(500),
            use_percentage: true,
        }
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allowed,
    Paused {
        reason: String,
        until: DateTime<Local>,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Emitted when a pause engages or escalates, for the notifier surface.
#[derive(Debug, Clone, PartialEq)]
pub struct PauseNotice {
    pub reason: String,
    pub until: DateTime<Local>,
    pub consecutive_losses: u32,
    pub total_pause_count: u32,
    pub daily_realized_pl: Decimal,
}

/// The circuit breaker. Holds persisted state and reads the ledger for
/// today's loss picture on every evaluation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    daily: DailyLossConfig,
    state_path: PathBuf,
    state: CircuitBreakerState,
    ledger: Arc<TradeLedger>,
}

impl CircuitBreaker {
    /// Load persisted state (or start fresh) for the given day.
    pub fn load(
        state_path: PathBuf,
        config: CircuitBreakerConfig,
        daily: DailyLossConfig,
        ledger: Arc<TradeLedger>,
        now: DateTime<Local>,
    ) -> ProtectResult<Self> {
        let state = CircuitBreakerState::load(&state_path, now.date_naive())?;
        Ok(Self {
            config,
            daily,
            state_path,
            state,
            ledger,
        })
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Recompute the consecutive-loss count after a close was recorded,
    /// then run the gates.
    pub fn on_trade_closed(
        &mut self,
        now: DateTime<Local>,
        current_balance: Decimal,
    ) -> ProtectResult<(Verdict, Option<PauseNotice>)> {
        let agg = self.ledger.daily_aggregate(now.date_naive())?;
        if self.state.consecutive_losses != agg.consecutive_losses_from_end {
            self.state.consecutive_losses = agg.consecutive_losses_from_end;
            self.state.save(&self.state_path)?;
        }
        self.check(now, current_balance)
    }

    /// Evaluate all gates. Engaging a pause persists state and returns
    /// a notice; evaluating twice without interleaving events returns
    /// the same verdict and no second notice.
    pub fn check(
        &mut self,
        now: DateTime<Local>,
        current_balance: Decimal,
    ) -> ProtectResult<(Verdict, Option<PauseNotice>)> {
        let today = now.date_naive();

        // Gate 1: day rollover
        if self.state.last_reset_date != today {
            info!(
                previous = %self.state.last_reset_date,
                today = %today,
                "Day rollover, resetting circuit breaker"
            );
            self.state.clear_pause();
            self.state.consecutive_losses = 0;
            self.state.last_reset_date = today;
            self.state.save(&self.state_path)?;
        }

        let agg = self.ledger.daily_aggregate(today)?;
        let consecutive = agg.consecutive_losses_from_end;

        // Gate 2: active pause, with tier-2 escalation on top of a
        // still-running tier-1 pause
        if self.state.is_paused {
            if let Some(end) = self.state.pause_end_time {
                if self.config.enabled
                    && consecutive >= self.config.consecutive_loss_threshold_2
                    && self.state.pause_threshold == Some(self.config.consecutive_loss_threshold_1)
                {
                    let until = end.max(now)
                        + Duration::hours(self.config.consecutive_loss_pause_hours_2);
                    let reason = format!(
                        "{} consecutive losses (threshold: {})",
                        consecutive, self.config.consecutive_loss_threshold_2
                    );
                    let notice = self.engage(
                        now,
                        until,
                        reason.clone(),
                        Some(self.config.consecutive_loss_threshold_2),
                        agg.total_realized_pl,
                    )?;
                    return Ok((Verdict::Paused { reason, until }, Some(notice)));
                }

                if now < end {
                    return Ok((
                        Verdict::Paused {
                            reason: self
                                .state
                                .pause_reason
                                .clone()
                                .unwrap_or_else(|| "paused".to_string()),
                            until: end,
                        },
                        None,
                    ));
                }
            }

            info!("Circuit breaker pause ended, trading resumed");
            self.state.clear_pause();
            self.state.save(&self.state_path)?;
        }

        // Gate 3: daily loss limit
        if self.daily.enabled
            && agg.closed_count > 0
            && agg.total_realized_pl < Decimal::ZERO
        {
            let loss = -agg.total_realized_pl;
            let anchor = self
                .ledger
                .first_trade_balance(today)?
                .unwrap_or(current_balance);
            let threshold = if self.daily.use_percentage {
                anchor * self.daily.max_daily_loss_percentage / Decimal::ONE_HUNDRED
            } else {
                self.daily.max_daily_loss_dollars
            };

            if threshold > Decimal::ZERO && loss >= threshold {
                let until = next_local_midnight(now);
                let reason = format!("daily loss limit ({} lost, limit {})", loss, threshold);
                let notice =
                    self.engage(now, until, reason.clone(), None, agg.total_realized_pl)?;
                return Ok((Verdict::Paused { reason, until }, Some(notice)));
            }
        }

        if self.config.enabled {
            // Gates 4/5: consecutive losses, higher tier first
            let tiers = [
                (
                    self.config.consecutive_loss_threshold_2,
                    self.config.consecutive_loss_pause_hours_2,
                ),
                (
                    self.config.consecutive_loss_threshold_1,
                    self.config.consecutive_loss_pause_hours_1,
                ),
            ];
            for (threshold, hours) in tiers {
                if consecutive >= threshold {
                    let until = now + Duration::hours(hours);
                    let reason =
                        format!("{} consecutive losses (threshold: {})", consecutive, threshold);
                    let notice = self.engage(
                        now,
                        until,
                        reason.clone(),
                        Some(threshold),
                        agg.total_realized_pl,
                    )?;
                    return Ok((Verdict::Paused { reason, until }, Some(notice)));
                }
            }

            // Gate 6: loss rate over the last N closed trades
            if agg.last_results.len() >= self.config.loss_rate_window {
                let losses = agg
                    .last_results
                    .iter()
                    .take(self.config.loss_rate_window)
                    .filter(|pl| **pl < Decimal::ZERO)
                    .count();
                let rate = Decimal::from(losses as u64) * Decimal::ONE_HUNDRED
                    / Decimal::from(self.config.loss_rate_window as u64);

                if rate >= self.config.loss_rate_threshold_pct {
                    let until = now + Duration::hours(self.config.loss_rate_pause_hours);
                    let reason = format!(
                        "{}% losses in last {} trades",
                        rate.round_dp(1),
                        self.config.loss_rate_window
                    );
                    let notice =
                        self.engage(now, until, reason.clone(), None, agg.total_realized_pl)?;
                    return Ok((Verdict::Paused { reason, until }, Some(notice)));
                }
            }
        }

        Ok((Verdict::Allowed, None))
    }

    fn engage(
        &mut self,
        now: DateTime<Local>,
        until: DateTime<Local>,
        reason: String,
        threshold: Option<u32>,
        daily_realized_pl: Decimal,
    ) -> ProtectResult<PauseNotice> {
        self.state.is_paused = true;
        self.state.pause_reason = Some(reason.clone());
        self.state.pause_start_time = Some(now);
        self.state.pause_end_time = Some(until);
        self.state.pause_threshold = threshold;
        self.state.total_pause_count += 1;
        self.state.save(&self.state_path)?;

        warn!(
            %reason,
            until = %until,
            pauses_today = self.state.total_pause_count,
            "Circuit breaker engaged"
        );

        Ok(PauseNotice {
            reason,
            until,
            consecutive_losses: self.state.consecutive_losses,
            total_pause_count: self.state.total_pause_count,
            daily_realized_pl,
        })
    }
}

/// Start of the next local calendar day.
fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let next = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    next.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or_else(|| now + Duration::hours(24))
}

// =============================================================================
// Tests
// =============================================================================
