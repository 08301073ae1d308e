//! Signal generation from the SAR trend and the configured intent.

use aurum_domain::{Signal, SignalKind, TradeIntent};
use chrono::{DateTime, Local};

use crate::sar::{SarReading, Trend};

/// Map the current SAR reading to a trading signal.
///
/// BUY when the trend is up and the intent allows buys, SELL when the
/// trend is down and the intent allows sells, HOLD otherwise. The
/// reason string records what was seen either way.
pub fn evaluate_signal(reading: &SarReading, intent: TradeIntent, at: DateTime<Local>) -> Signal {
    let raw = match reading.trend {
        Trend::Uptrend => SignalKind::Buy,
        Trend::Downtrend => SignalKind::Sell,
    };

    if intent.accepts(raw) {
        Signal {
            kind: raw,
            reason: format!(
                "{} (sar={}, distance={}{})",
                reading.trend,
                reading.sar,
                reading.distance,
                if reading.flipped { ", flipped" } else { "" }
            ),
            at,
        }
    } else {
        Signal {
            kind: SignalKind::Hold,
            reason: format!("{} filtered by intent {}", reading.trend, intent),
            at,
        }
    }
}
