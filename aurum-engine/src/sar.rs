//! Parabolic SAR — Wilder's stop-and-reverse system.
//!
//! Inherently sequential: each bar carries forward the SAR level, the
//! trend direction, the extreme point (EP), and the acceleration
//! factor (AF). The computation is stateless at the API level — the
//! caller provides the full bar window on every call and gets back the
//! reading at the last bar.
//!
//! # Transition rules
//!
//! From bar i−1 to bar i:
//! 1. tentative SAR = SAR + AF × (EP − SAR)
//! 2. In an uptrend the tentative SAR is clamped below the prior two
//!    lows; if the new bar's low touches it, the trend flips: SAR
//!    becomes the old EP, AF resets, EP restarts at the new low.
//!    Otherwise a new high advances EP and steps AF up to its cap.
//! 3. The downtrend case is symmetric over highs.

use aurum_domain::Bar;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Acceleration parameters. Defaults: start/step 0.02, cap 0.2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SarParams {
    pub acceleration: Decimal,
    pub maximum: Decimal,
}

impl Default for SarParams {
    fn default() -> Self {
        Self {
            acceleration: Decimal::new(2, 2), // 0.02
            maximum: Decimal::new(2, 1),      // 0.2
        }
    }
}

/// Trend direction at a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Uptrend,
    Downtrend,
}

impl Trend {
    /// Whether this trend supports a position on the given side.
    pub fn supports(&self, side: aurum_domain::Side) -> bool {
        match self {
            Trend::Uptrend => side.is_buy(),
            Trend::Downtrend => !side.is_buy(),
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Uptrend => write!(f, "UPTREND"),
            Trend::Downtrend => write!(f, "DOWNTREND"),
        }
    }
}

/// SAR state at the last bar of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SarReading {
    /// SAR level at the last bar
    pub sar: Decimal,
    pub trend: Trend,
    /// Extreme point carried by the current trend
    pub extreme_point: Decimal,
    /// Acceleration factor at the last bar
    pub acceleration: Decimal,
    /// |last close − SAR|
    pub distance: Decimal,
    /// Trend at the last bar differs from the bar before it
    pub flipped: bool,
}

/// Compute the SAR reading at the last bar of the window.
///
/// Needs at least two bars. The initial trend is taken from the sign
/// of the first close-to-close move; a flat move counts as an uptrend.
/// A warm-up window of 50 bars or more is recommended before acting on
/// the output.
///
/// # Errors
///
/// `EngineError::InsufficientBars` when fewer than two bars are given.
pub fn compute_sar(params: SarParams, bars: &[Bar]) -> EngineResult<SarReading> {
    if bars.len() < 2 {
        return Err(EngineError::InsufficientBars {
            got: bars.len(),
            need: 2,
        });
    }

    let mut trend = if bars[1].close >= bars[0].close {
        Trend::Uptrend
    } else {
        Trend::Downtrend
    };
    let (mut sar, mut ep) = match trend {
        Trend::Uptrend => (bars[0].low, bars[0].high),
        Trend::Downtrend => (bars[0].high, bars[0].low),
    };
    let mut af = params.acceleration;
    let mut prev_trend = trend;

    for i in 1..bars.len() {
        prev_trend = trend;
        let mut tentative = sar + af * (ep - sar);

        match trend {
            Trend::Uptrend => {
                // SAR may not rise above the prior two lows
                tentative = tentative.min(bars[i - 1].low);
                if i >= 2 {
                    tentative = tentative.min(bars[i - 2].low);
                }

                if bars[i].low <= tentative {
                    trend = Trend::Downtrend;
                    sar = ep;
                    ep = bars[i].low;
                    af = params.acceleration;
                } else {
                    sar = tentative;
                    if bars[i].high > ep {
                        ep = bars[i].high;
                        af = (af + params.acceleration).min(params.maximum);
                    }
                }
            }
            Trend::Downtrend => {
                // SAR may not fall below the prior two highs
                tentative = tentative.max(bars[i - 1].high);
                if i >= 2 {
                    tentative = tentative.max(bars[i - 2].high);
                }

                if bars[i].high >= tentative {
                    trend = Trend::Uptrend;
                    sar = ep;
                    ep = bars[i].high;
                    af = params.acceleration;
                } else {
                    sar = tentative;
                    if bars[i].low < ep {
                        ep = bars[i].low;
                        af = (af + params.acceleration).min(params.maximum);
                    }
                }
            }
        }
    }

    let last_close = bars[bars.len() - 1].close;
    Ok(SarReading {
        sar,
        trend,
        extreme_point: ep,
        acceleration: af,
        distance: (last_close - sar).abs(),
        flipped: trend != prev_trend,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn make_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let base = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Bar {
                time: base + chrono::Duration::minutes(15 * i as i64),
                open: Decimal::try_from(open).unwrap(),
                high: Decimal::try_from(high).unwrap(),
                low: Decimal::try_from(low).unwrap(),
                close: Decimal::try_from(close).unwrap(),
                tick_volume: 1000,
            })
            .collect()
    }

    fn rising_bars(n: usize) -> Vec<Bar> {
        let data: Vec<_> = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                (base, base + 2.0, base - 1.0, base + 1.5)
            })
            .collect();
        make_bars(&data)
    }

    #[test]
    fn test_too_few_bars() {
        let bars = make_bars(&[(100.0, 105.0, 95.0, 102.0)]);
        let err = compute_sar(SarParams::default(), &bars).unwrap_err();
        assert_eq!(err, EngineError::InsufficientBars { got: 1, need: 2 });
    }

    #[test]
    fn test_uptrend_sar_below_price() {
        let bars = rising_bars(10);
        let reading = compute_sar(SarParams::default(), &bars).unwrap();

        assert_eq!(reading.trend, Trend::Uptrend);
        assert!(!reading.flipped);
        assert!(reading.sar < bars.last().unwrap().low);
        assert_eq!(
            reading.distance,
            bars.last().unwrap().close - reading.sar
        );
    }

    #[test]
    fn test_downtrend_sar_above_price() {
        let data: Vec<_> = (0..10)
            .map(|i| {
                let base = 200.0 - i as f64 * 3.0;
                (base, base + 1.0, base - 2.0, base - 1.5)
            })
            .collect();
        let bars = make_bars(&data);
        let reading = compute_sar(SarParams::default(), &bars).unwrap();

        assert_eq!(reading.trend, Trend::Downtrend);
        assert!(reading.sar > bars.last().unwrap().high);
    }

    #[test]
    fn test_sharp_reversal_flips_trend() {
        let bars = make_bars(&[
            (100.0, 105.0, 98.0, 103.0),
            (103.0, 108.0, 101.0, 107.0),
            (107.0, 112.0, 105.0, 111.0),
            (111.0, 115.0, 109.0, 114.0),
            // Collapse through the SAR
            (114.0, 114.5, 100.0, 101.0),
        ]);
        let reading = compute_sar(SarParams::default(), &bars).unwrap();

        assert_eq!(reading.trend, Trend::Downtrend);
        assert!(reading.flipped, "flip must be reported at the last bar");
        // On reversal the SAR jumps to the previous extreme point
        assert_eq!(reading.sar, dec!(115.0));
        assert_eq!(reading.extreme_point, dec!(100.0));
        assert_eq!(reading.acceleration, dec!(0.02));
    }

    #[test]
    fn test_flip_cleared_one_bar_later() {
        let mut data = vec![
            (100.0, 105.0, 98.0, 103.0),
            (103.0, 108.0, 101.0, 107.0),
            (107.0, 112.0, 105.0, 111.0),
            (111.0, 115.0, 109.0, 114.0),
            (114.0, 114.5, 100.0, 101.0),
        ];
        data.push((101.0, 102.0, 95.0, 96.0)); // downtrend continues
        let bars = make_bars(&data);
        let reading = compute_sar(SarParams::default(), &bars).unwrap();

        assert_eq!(reading.trend, Trend::Downtrend);
        assert!(!reading.flipped);
    }

    #[test]
    fn test_acceleration_caps_at_maximum() {
        let bars = rising_bars(30);
        let params = SarParams {
            acceleration: dec!(0.02),
            maximum: dec!(0.10),
        };
        let reading = compute_sar(params, &bars).unwrap();
        assert_eq!(reading.acceleration, dec!(0.10));
    }

    #[test]
    fn test_deterministic_over_identical_input() {
        let bars = rising_bars(50);
        let a = compute_sar(SarParams::default(), &bars).unwrap();
        let b = compute_sar(SarParams::default(), &bars).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_low_touching_sar_flips() {
        // A bar whose low lands exactly on the tentative SAR must flip
        // the trend (touch counts as a hit).
        // Tentative SAR at the last bar clamps to min(low_1, low_0) = 99.0
        // and the last bar's low is exactly 99.0.
        let bars = make_bars(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 102.0, 100.0, 101.5),
            (101.5, 103.0, 99.0, 99.5),
        ]);
        let reading = compute_sar(SarParams::default(), &bars).unwrap();
        assert_eq!(reading.trend, Trend::Downtrend);
        assert!(reading.flipped);
    }

    #[test]
    fn test_trend_supports_side() {
        assert!(Trend::Uptrend.supports(aurum_domain::Side::Buy));
        assert!(!Trend::Uptrend.supports(aurum_domain::Side::Sell));
        assert!(Trend::Downtrend.supports(aurum_domain::Side::Sell));
    }
}
