//! Strategy engine: Parabolic SAR, signal generation, and risk sizing.
//!
//! Everything in this crate is a pure function over its inputs. The
//! caller supplies the bar window and account numbers; nothing here
//! performs I/O or holds state between calls, so identical inputs
//! always produce identical outputs.

pub mod error;
pub mod risk;
pub mod sar;
pub mod signal;

pub use error::{EngineError, EngineResult};
pub use risk::{
    check_margin, derive_take_profit, position_size, risk_summary, LotConstraints, RiskSummary,
};
pub use sar::{compute_sar, SarParams, SarReading, Trend};
pub use signal::evaluate_signal;
