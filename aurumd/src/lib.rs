//! Trading daemon library.
//!
//! Wires the bridge, strategy engine, ledger, and protection gates
//! into the trading state machine:
//!
//! ```text
//! WAITING_FOR_SIGNAL → OPENING → MONITORING → CLOSED → WAITING_FOR_SIGNAL
//! ```
//!
//! The binary in `main.rs` loads configuration from the environment,
//! starts the daemon, and maps the outcome to process exit codes.

pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod mirror;
pub mod monitor;
pub mod trading_loop;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus};
pub use monitor::{MonitorOutcome, MonitorSettings, PositionMonitor};
pub use trading_loop::{ExitStatus, LoopSettings, TradingLoop};
