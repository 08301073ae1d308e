//! Daemon configuration.
//!
//! Loaded from environment variables (with a `.env` bootstrap) into a
//! typed tree with sensible defaults. Invalid values are fatal at
//! startup; nothing here is re-read at runtime.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use aurum_domain::TradeIntent;
use aurum_protect::{CircuitBreakerConfig, DailyLossConfig};
use rust_decimal::Decimal;

use crate::error::{DaemonError, DaemonResult};

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Development,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Bridge endpoint settings.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub command_timeout_secs: u64,
}

/// Trading loop settings.
#[derive(Debug, Clone)]
pub struct TradingSettings {
    /// Which signal kinds may open a position
    pub desired_signal: TradeIntent,
    /// Percent of balance risked per trade
    pub risk_percentage: Decimal,
    pub signal_check_interval_secs: u64,
    pub position_check_interval_secs: u64,
    /// Ticks older than this defer decisions
    pub tick_ttl_secs: u64,
}

/// Indicator settings.
#[derive(Debug, Clone)]
pub struct SarSettings {
    pub acceleration: Decimal,
    pub maximum: Decimal,
    pub timeframe_minutes: u32,
    /// Minimum bars before the first decision
    pub warmup_bars: usize,
    /// Bars requested per history fetch
    pub history_bars: u32,
}

/// Full daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Root for trade logs, protection state, and the account mirror
    pub logs_dir: PathBuf,
    pub bridge: BridgeSettings,
    pub trading: TradingSettings,
    /// Accepted symbol aliases, first match wins
    pub symbol_priority: Vec<String>,
    pub sar: SarSettings,
    pub circuit_breaker: CircuitBreakerConfig,
    pub daily_loss: DailyLossConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        let _ = dotenvy::dotenv();

        let environment = match env::var("AURUM_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "test" => Environment::Test,
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            other => {
                return Err(DaemonError::Config(format!(
                    "Invalid AURUM_ENV: {}. Expected: test, development, production",
                    other
                )))
            }
        };

        let logs_dir =
            PathBuf::from(env::var("AURUM_LOGS_DIR").unwrap_or_else(|_| ".".to_string()));

        let bridge = BridgeSettings {
            host: env::var("AURUM_BRIDGE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("AURUM_BRIDGE_PORT", 9090u16)?,
            heartbeat_interval_secs: parse_env("AURUM_HEARTBEAT_INTERVAL", 5u64)?,
            command_timeout_secs: parse_env("AURUM_COMMAND_TIMEOUT", 5u64)?,
        };

        let trading = TradingSettings {
            desired_signal: parse_env("AURUM_DESIRED_SIGNAL", TradeIntent::Both)?,
            risk_percentage: parse_env("AURUM_RISK_PERCENTAGE", Decimal::ONE)?,
            signal_check_interval_secs: parse_env("AURUM_SIGNAL_CHECK_INTERVAL", 30u64)?,
            position_check_interval_secs: parse_env("AURUM_POSITION_CHECK_INTERVAL", 5u64)?,
            tick_ttl_secs: parse_env("AURUM_TICK_TTL", 10u64)?,
        };
        if trading.risk_percentage <= Decimal::ZERO || trading.risk_percentage > Decimal::TEN {
            return Err(DaemonError::Config(format!(
                "AURUM_RISK_PERCENTAGE must be in (0, 10], got {}",
                trading.risk_percentage
            )));
        }
        if trading.signal_check_interval_secs == 0 || trading.position_check_interval_secs == 0 {
            return Err(DaemonError::Config(
                "Check intervals must be positive".to_string(),
            ));
        }

        let symbol_priority: Vec<String> = env::var("AURUM_SYMBOLS")
            .unwrap_or_else(|_| "XAUUSD,GOLD,XAUUSD.,XAUUSDm,XAUUSD.a".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbol_priority.is_empty() {
            return Err(DaemonError::Config(
                "AURUM_SYMBOLS cannot be empty".to_string(),
            ));
        }

        let sar = SarSettings {
            acceleration: parse_env("AURUM_SAR_ACCELERATION", Decimal::new(2, 2))?,
            maximum: parse_env("AURUM_SAR_MAXIMUM", Decimal::new(2, 1))?,
            timeframe_minutes: parse_env("AURUM_SAR_TIMEFRAME_MINUTES", 15u32)?,
            warmup_bars: parse_env("AURUM_SAR_WARMUP_BARS", 50usize)?,
            history_bars: parse_env("AURUM_SAR_HISTORY_BARS", 100u32)?,
        };
        if sar.warmup_bars < 2 {
            return Err(DaemonError::Config(
                "AURUM_SAR_WARMUP_BARS must be at least 2".to_string(),
            ));
        }

        let circuit_breaker = CircuitBreakerConfig {
            enabled: parse_env("AURUM_CB_ENABLED", true)?,
            consecutive_loss_threshold_1: parse_env("AURUM_CB_CONSECUTIVE_THRESHOLD_1", 5u32)?,
            consecutive_loss_pause_hours_1: parse_env("AURUM_CB_PAUSE_HOURS_1", 3i64)?,
            consecutive_loss_threshold_2: parse_env("AURUM_CB_CONSECUTIVE_THRESHOLD_2", 8u32)?,
            consecutive_loss_pause_hours_2: parse_env("AURUM_CB_PAUSE_HOURS_2", 5i64)?,
            loss_rate_window: parse_env("AURUM_CB_LOSS_RATE_WINDOW", 10usize)?,
            loss_rate_threshold_pct: parse_env("AURUM_CB_LOSS_RATE_THRESHOLD", Decimal::from(70))?,
            loss_rate_pause_hours: parse_env("AURUM_CB_LOSS_RATE_PAUSE_HOURS", 5i64)?,
        };

        let daily_loss = DailyLossConfig {
            enabled: parse_env("AURUM_DAILY_LOSS_ENABLED", true)?,
            max_daily_loss_percentage: parse_env(
                "AURUM_DAILY_LOSS_MAX_PERCENTAGE",
                Decimal::from(5),
            )?,
            max_daily_loss_dollars: parse_env("AURUM_DAILY_LOSS_MAX_DOLLARS", Decimal::from(500))?,
            use_percentage: parse_env("AURUM_DAILY_LOSS_USE_PERCENTAGE", true)?,
        };

        Ok(Self {
            environment,
            logs_dir,
            bridge,
            trading,
            symbol_priority,
            sar,
            circuit_breaker,
            daily_loss,
        })
    }

    /// Test configuration: fast intervals, OS-assigned port.
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            logs_dir: PathBuf::from("."),
            bridge: BridgeSettings {
                host: "127.0.0.1".to_string(),
                port: 0,
                heartbeat_interval_secs: 1,
                command_timeout_secs: 1,
            },
            trading: TradingSettings {
                desired_signal: TradeIntent::Both,
                risk_percentage: Decimal::ONE,
                signal_check_interval_secs: 1,
                position_check_interval_secs: 1,
                tick_ttl_secs: 60,
            },
            symbol_priority: vec!["XAUUSD".to_string()],
            sar: SarSettings {
                acceleration: Decimal::new(2, 2),
                maximum: Decimal::new(2, 1),
                timeframe_minutes: 15,
                warmup_bars: 50,
                history_bars: 100,
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            daily_loss: DailyLossConfig::default(),
        }
    }

    pub fn signal_check_interval(&self) -> Duration {
        Duration::from_secs(self.trading.signal_check_interval_secs)
    }

    pub fn position_check_interval(&self) -> Duration {
        Duration::from_secs(self.trading.position_check_interval_secs)
    }

    pub fn tick_ttl(&self) -> Duration {
        Duration::from_secs(self.trading.tick_ttl_secs)
    }
}

/// Parse an env var with a typed default; a present-but-invalid value
/// is a configuration error, not a silent fallback.
fn parse_env<T>(key: &str, default: T) -> DaemonResult<T>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Tests
// =============================================================================
