//! Broker port definition.
//!
//! The port covers exactly the command set the terminal understands.
//! Market data is not part of the port — it streams into the cache on
//! its own; the port only returns what a command round-trip yields.

use async_trait::async_trait;
use aurum_domain::{Bar, OpenOrderRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Commands toward the trading terminal.
///
/// Implementations:
/// - the live bridge connection (socket transport)
/// - `StubBroker` for tests (immediate fills at a configured price)
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Place a market order and await its result.
    async fn open_order(&self, request: &OpenOrderRequest) -> Result<OrderAck, ExecError>;

    /// Close the position with the given ticket and await the ack.
    async fn close_position(&self, ticket: i64) -> Result<(), ExecError>;

    /// Move stop loss and take profit of an open position.
    async fn modify_position(&self, ticket: i64, sl: Decimal, tp: Decimal)
        -> Result<(), ExecError>;

    /// Ask the terminal to re-report open positions; returns the
    /// tickets that are currently live.
    async fn refresh_positions(&self) -> Result<Vec<i64>, ExecError>;

    /// Fetch the most recent bars of the given timeframe.
    async fn fetch_bars(&self, count: u32, timeframe_minutes: u32)
        -> Result<Vec<Bar>, ExecError>;
}

/// Successful open acknowledgment from the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub ticket: i64,
    pub fill_price: Decimal,
    pub volume: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}
