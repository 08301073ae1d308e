//! Core enums and validation errors.
//!
//! Immutable, validated domain primitives shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain-level validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Volume must be positive
    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    /// Unknown signal intent keyword
    #[error("Invalid trade intent: {0}")]
    InvalidIntent(String),

    /// Unknown close reason keyword
    #[error("Invalid close reason: {0}")]
    InvalidCloseReason(String),
}

// =============================================================================
// Side
// =============================================================================

/// Direction of a market position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Long position, entered at the ask
    Buy,
    /// Short position, entered at the bid
    Sell,
}

impl Side {
    /// The opposite direction (used when checking a flip against an
    /// open position).
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// Signal kind and intent
// =============================================================================

/// What the strategy wants to do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    /// The position side this signal opens, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalKind::Buy => Some(Side::Buy),
            SignalKind::Sell => Some(Side::Sell),
            SignalKind::Hold => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Sell => write!(f, "SELL"),
            SignalKind::Hold => write!(f, "HOLD"),
        }
    }
}

/// Which signal kinds are allowed to open a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeIntent {
    Buy,
    Sell,
    Both,
}

impl TradeIntent {
    /// Whether a signal of the given kind may open a position under
    /// this intent.
    pub fn accepts(&self, kind: SignalKind) -> bool {
        match (self, kind) {
            (_, SignalKind::Hold) => false,
            (TradeIntent::Both, _) => true,
            (TradeIntent::Buy, SignalKind::Buy) => true,
            (TradeIntent::Sell, SignalKind::Sell) => true,
            _ => false,
        }
    }
}

impl FromStr for TradeIntent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeIntent::Buy),
            "SELL" => Ok(TradeIntent::Sell),
            "BOTH" => Ok(TradeIntent::Both),
            other => Err(DomainError::InvalidIntent(other.to_string())),
        }
    }
}

impl fmt::Display for TradeIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeIntent::Buy => write!(f, "BUY"),
            TradeIntent::Sell => write!(f, "SELL"),
            TradeIntent::Both => write!(f, "BOTH"),
        }
    }
}

// =============================================================================
// Close reason
// =============================================================================

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Broker-side take profit filled
    TpHit,
    /// Broker-side stop loss filled
    SlHit,
    /// The trend indicator flipped against the position
    SarReversal,
    /// Price crossed the stop level while the broker stop did not fire
    EmergencySl,
    /// Operator- or shutdown-initiated close
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TpHit => "TP_HIT",
            CloseReason::SlHit => "SL_HIT",
            CloseReason::SarReversal => "SAR_REVERSAL",
            CloseReason::EmergencySl => "EMERGENCY_SL",
            CloseReason::Manual => "MANUAL",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Tests
// =============================================================================
