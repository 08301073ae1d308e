//! Domain types for the Aurum trading core.
//!
//! Shared vocabulary for every other crate: market snapshots, bars,
//! positions, signals, and the persistent trade record. All prices,
//! volumes, and monetary amounts are `rust_decimal::Decimal`.

pub mod market;
pub mod position;
pub mod record;
pub mod value_objects;

pub use market::{AccountSnapshot, Bar, Tick};
pub use position::{OpenOrderRequest, Position, Signal};
pub use record::{TradeRecord, TradeStatus};
pub use value_objects::{CloseReason, DomainError, Side, SignalKind, TradeIntent};
