//! Engine error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors from strategy and risk computations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Not enough bars to compute the indicator
    #[error("Insufficient bars: got {got}, need at least {need}")]
    InsufficientBars { got: usize, need: usize },

    /// Normalized lot fell below the broker minimum
    #[error("Lot too small: {lot} is below the broker minimum {min_lot}")]
    LotTooSmall { lot: Decimal, min_lot: Decimal },

    /// Stop loss on the wrong side of the entry price
    #[error("Invalid stop loss: {0}")]
    InvalidStopLoss(String),

    /// Risk percentage outside the accepted range
    #[error("Invalid risk percentage: {0}")]
    InvalidRiskPercentage(Decimal),

    /// Free margin cannot carry the planned position
    #[error("Insufficient margin: need {required}, free {free}")]
    InsufficientMargin { required: Decimal, free: Decimal },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
