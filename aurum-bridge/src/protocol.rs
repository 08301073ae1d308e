//! Wire protocol between the bridge and the EA.
//!
//! Frames are UTF-8 JSON objects terminated by a newline. Every
//! inbound frame carries a `type` discriminator, every outbound
//! command an `action`. An unknown discriminator fails to parse and is
//! treated as a protocol error by the server, not silently passed
//! through.
//!
//! Timestamps on the wire use the terminal's `"YYYY-MM-DD HH:MM:SS"`
//! notation.

use aurum_domain::{AccountSnapshot, Bar, Position, Side, Tick};
use chrono::{DateTime, Local, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Serde adapter for the terminal's timestamp notation.
pub mod server_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Inbound frames (EA → bridge)
// =============================================================================

/// One frame from the EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EaFrame {
    MarketData(MarketDataFrame),
    Position(PositionFrame),
    Rates(RatesFrame),
    OrderResult(OrderResultFrame),
    Response(ResponseFrame),
    Heartbeat(HeartbeatFrame),
}

/// Combined quote, symbol geometry, and account snapshot. The EA sends
/// everything in one frame on each tick; the bridge splits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataFrame {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread: i64,
    #[serde(with = "server_time")]
    pub time: NaiveDateTime,
    pub point: Decimal,
    pub digits: u32,
    pub contract_size: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
    pub lot_step: Decimal,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub profit: Decimal,
    pub leverage: i64,
    pub open_positions: u32,
}

impl MarketDataFrame {
    pub fn split(self) -> (Tick, AccountSnapshot) {
        let tick = Tick {
            symbol: self.symbol,
            bid: self.bid,
            ask: self.ask,
            spread: self.spread,
            time: self.time,
            point: self.point,
            digits: self.digits,
            contract_size: self.contract_size,
            min_lot: self.min_lot,
            max_lot: self.max_lot,
            lot_step: self.lot_step,
        };
        let account = AccountSnapshot {
            balance: self.balance,
            equity: self.equity,
            margin: self.margin,
            free_margin: self.free_margin,
            profit: self.profit,
            leverage: self.leverage,
            open_positions: self.open_positions,
        };
        (tick, account)
    }
}

/// One open position as reported by the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionFrame {
    pub ticket: i64,
    pub symbol: String,
    pub pos_type: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub profit: Decimal,
    #[serde(default)]
    pub comment: String,
}

impl PositionFrame {
    pub fn into_position(self, first_seen: DateTime<Local>) -> Position {
        Position {
            ticket: self.ticket,
            symbol: self.symbol,
            side: self.pos_type,
            volume: self.volume,
            price_open: self.price_open,
            price_current: self.price_current,
            sl: self.sl,
            tp: self.tp,
            profit: self.profit,
            comment: self.comment,
            opened_at: first_seen,
        }
    }
}

/// Reply to a `GET_RATES` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesFrame {
    pub data: Vec<RateFrame>,
}

/// One bar of the requested timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateFrame {
    #[serde(with = "server_time")]
    pub time: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl RatesFrame {
    pub fn into_bars(self) -> Vec<Bar> {
        self.data
            .into_iter()
            .map(|r| Bar {
                time: r.time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                tick_volume: r.volume,
            })
            .collect()
    }
}

/// Reply to a BUY or SELL command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResultFrame {
    pub success: bool,
    #[serde(default)]
    pub action: Option<Side>,
    #[serde(default)]
    pub ticket: i64,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub sl: Decimal,
    #[serde(default)]
    pub tp: Decimal,
    #[serde(default)]
    pub error: Option<String>,
}

/// Generic acknowledgment for CLOSE / MODIFY / GET_POSITIONS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Liveness frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// =============================================================================
// Outbound commands (bridge → EA)
// =============================================================================

/// One command toward the EA.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action")]
pub enum EaCommand {
    #[serde(rename = "BUY")]
    Buy {
        volume: Decimal,
        sl: Decimal,
        tp: Decimal,
        comment: String,
    },
    #[serde(rename = "SELL")]
    Sell {
        volume: Decimal,
        sl: Decimal,
        tp: Decimal,
        comment: String,
    },
    #[serde(rename = "CLOSE")]
    Close { ticket: i64 },
    #[serde(rename = "MODIFY")]
    Modify {
        ticket: i64,
        sl: Decimal,
        tp: Decimal,
    },
    #[serde(rename = "GET_POSITIONS")]
    GetPositions,
    #[serde(rename = "GET_RATES")]
    GetRates { count: u32, timeframe: u32 },
}

impl EaCommand {
    /// Short label for logs and timeout messages.
    pub fn describe(&self) -> &'static str {
        match self {
            EaCommand::Buy { .. } => "BUY",
            EaCommand::Sell { .. } => "SELL",
            EaCommand::Close { .. } => "CLOSE",
            EaCommand::Modify { .. } => "MODIFY",
            EaCommand::GetPositions => "GET_POSITIONS",
            EaCommand::GetRates { .. } => "GET_RATES",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
