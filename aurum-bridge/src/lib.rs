//! Socket bridge to the trading terminal.
//!
//! A companion program inside the terminal (the EA) connects to this
//! server over TCP and exchanges newline-terminated JSON frames: market
//! data, positions, bars, and command acknowledgments flow in; trade
//! commands flow out. The bridge owns the connection lifecycle, the
//! market-data cache, and the command/reply correlation; everything
//! above it talks through `BridgeHandle`, which implements the broker
//! port.

pub mod cache;
pub mod error;
pub mod protocol;
pub mod server;

pub use cache::MarketDataCache;
pub use error::{BridgeError, BridgeResult};
pub use protocol::{EaCommand, EaFrame};
pub use server::{BridgeConfig, BridgeHandle, BridgeServer, ConnectionState};
