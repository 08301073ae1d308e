//! Risk sizing: lot calculation from a risk percentage, stop-side
//! validation, and take-profit derivation at a fixed 1:2 risk/reward.

use aurum_domain::{Side, Tick};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Reward distance is twice the risk distance.
pub const RISK_REWARD_RATIO: Decimal = Decimal::TWO;

/// Broker volume constraints and price geometry for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotConstraints {
    pub contract_size: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
    pub lot_step: Decimal,
    pub digits: u32,
}

impl From<&Tick> for LotConstraints {
    fn from(tick: &Tick) -> Self {
        Self {
            contract_size: tick.contract_size,
            min_lot: tick.min_lot,
            max_lot: tick.max_lot,
            lot_step: tick.lot_step,
            digits: tick.digits,
        }
    }
}

/// Check that the stop sits on the protective side of the entry.
///
/// # Errors
///
/// `EngineError::InvalidStopLoss` when the stop is at or beyond the
/// entry in the wrong direction.
pub fn validate_stop(entry: Decimal, stop_loss: Decimal, side: Side) -> EngineResult<()> {
    match side {
        Side::Buy if stop_loss >= entry => Err(EngineError::InvalidStopLoss(format!(
            "BUY requires stop below entry (entry={entry}, sl={stop_loss})"
        ))),
        Side::Sell if stop_loss <= entry => Err(EngineError::InvalidStopLoss(format!(
            "SELL requires stop above entry (entry={entry}, sl={stop_loss})"
        ))),
        _ => Ok(()),
    }
}

/// Lot size that risks `risk_pct` percent of the balance between entry
/// and stop.
///
/// Raw size is `balance × risk% / (stop distance × contract size)`,
/// floored to the broker's lot step and capped at the maximum lot.
///
/// # Errors
///
/// - `InvalidRiskPercentage` when the percentage is not in (0, 10]
/// - `InvalidStopLoss` when the stop is on the wrong side of entry
/// - `LotTooSmall` when the floored size is below the broker minimum
pub fn position_size(
    balance: Decimal,
    risk_pct: Decimal,
    entry: Decimal,
    stop_loss: Decimal,
    side: Side,
    constraints: &LotConstraints,
) -> EngineResult<Decimal> {
    if risk_pct <= Decimal::ZERO || risk_pct > Decimal::TEN {
        return Err(EngineError::InvalidRiskPercentage(risk_pct));
    }
    validate_stop(entry, stop_loss, side)?;

    let risk_amount = balance * risk_pct / Decimal::ONE_HUNDRED;
    let stop_distance = (entry - stop_loss).abs();
    let raw = risk_amount / (stop_distance * constraints.contract_size);

    let lot = (raw / constraints.lot_step).floor() * constraints.lot_step;

    if lot < constraints.min_lot {
        return Err(EngineError::LotTooSmall {
            lot,
            min_lot: constraints.min_lot,
        });
    }

    Ok(lot.min(constraints.max_lot))
}

/// Take profit at twice the stop distance, rounded to the symbol's
/// digits.
///
/// # Errors
///
/// `EngineError::InvalidStopLoss` when the stop is on the wrong side
/// of entry for the requested side.
pub fn derive_take_profit(
    entry: Decimal,
    stop_loss: Decimal,
    side: Side,
    digits: u32,
) -> EngineResult<Decimal> {
    validate_stop(entry, stop_loss, side)?;

    let reward = (entry - stop_loss).abs() * RISK_REWARD_RATIO;
    let tp = match side {
        Side::Buy => entry + reward,
        Side::Sell => entry - reward,
    };
    Ok(tp.round_dp(digits))
}

/// Check that free margin can carry the planned position. Margin is
/// estimated as notional value over leverage.
///
/// # Errors
///
/// `EngineError::InsufficientMargin` when the estimate exceeds the
/// account's free margin.
pub fn check_margin(
    volume: Decimal,
    entry: Decimal,
    contract_size: Decimal,
    leverage: i64,
    free_margin: Decimal,
) -> EngineResult<()> {
    let leverage = Decimal::from(leverage.max(1));
    let required = volume * contract_size * entry / leverage;
    if required > free_margin {
        return Err(EngineError::InsufficientMargin {
            required,
            free: free_margin,
        });
    }
    Ok(())
}

/// Monetary breakdown of a planned trade, logged before every open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub volume: Decimal,
    pub risk_points: Decimal,
    pub reward_points: Decimal,
    pub risk_amount: Decimal,
    pub reward_amount: Decimal,
}

/// Describe the risk and reward of a sized trade.
pub fn risk_summary(
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    volume: Decimal,
    side: Side,
    contract_size: Decimal,
) -> RiskSummary {
    let (risk_points, reward_points) = match side {
        Side::Buy => (entry - stop_loss, take_profit - entry),
        Side::Sell => (stop_loss - entry, entry - take_profit),
    };

    RiskSummary {
        entry,
        stop_loss,
        take_profit,
        volume,
        risk_points,
        reward_points,
        risk_amount: risk_points * contract_size * volume,
        reward_amount: reward_points * contract_size * volume,
    }
}

// =============================================================================
// Tests
// =============================================================================
