//! Daemon: runtime orchestrator.
//!
//! # Lifecycle
//!
//! 1. Open the ledger and log today's statistics
//! 2. Load circuit-breaker state and run the startup gate check
//! 3. Bind the bridge endpoint and start accepting the EA
//! 4. Spawn the event-log surface and the account mirror
//! 5. Run the trading loop until shutdown (ctrl-c)
//! 6. Close any open position, persist state, report the exit status

use std::sync::Arc;
use std::time::Duration;

use aurum_bridge::{BridgeConfig, BridgeServer};
use aurum_exec::OrderExecutor;
use aurum_ledger::TradeLedger;
use aurum_protect::CircuitBreaker;
use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};
use crate::mirror::spawn_account_mirror;
use crate::monitor::MonitorSettings;
use crate::trading_loop::{ExitStatus, LoopSettings, TradingLoop};

/// How often the account mirror file is refreshed.
const MIRROR_INTERVAL: Duration = Duration::from_secs(10);

/// The trading daemon.
pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> DaemonResult<ExitStatus> {
        let config = self.config;
        info!(
            environment = %config.environment,
            host = %config.bridge.host,
            port = config.bridge.port,
            "Starting daemon"
        );

        // 1. Ledger
        let ledger = Arc::new(TradeLedger::new(&config.logs_dir)?);
        let today = Local::now().date_naive();
        let stats = ledger.daily_statistics(today)?;
        info!(
            trades = stats.total_trades,
            closed = stats.closed_trades,
            win_rate = %stats.win_rate,
            total_profit = %stats.total_profit,
            "Today so far"
        );

        // 2. Protection
        let breaker = CircuitBreaker::load(
            config.logs_dir.join("circuit_breaker_state.json"),
            config.circuit_breaker.clone(),
            config.daily_loss.clone(),
            ledger.clone(),
            Local::now(),
        )?;
        let breaker = Arc::new(tokio::sync::Mutex::new(breaker));

        let cancel = CancellationToken::new();
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("Failed to install ctrl-c handler");
                return;
            }
            info!("Shutdown requested");
            ctrl_c_cancel.cancel();
        });

        // 3. Bridge
        let bridge_config = BridgeConfig {
            host: config.bridge.host.clone(),
            port: config.bridge.port,
            heartbeat_interval: Duration::from_secs(config.bridge.heartbeat_interval_secs),
            command_timeout: Duration::from_secs(config.bridge.command_timeout_secs),
            ..BridgeConfig::default()
        };
        let (handle, bridge_task) = BridgeServer::spawn(bridge_config, cancel.clone()).await?;
        let cache = handle.cache();

        // 4. Observers
        let bus = Arc::new(EventBus::default());
        spawn_event_log(bus.clone(), cancel.clone());
        spawn_connection_watcher(handle.state_receiver(), bus.clone(), cancel.clone());
        let mirror_task = spawn_account_mirror(
            cache.clone(),
            config.logs_dir.join("account_info.json"),
            MIRROR_INTERVAL,
            cancel.clone(),
        );

        // 5. Trading loop
        let broker = Arc::new(handle.clone());
        let executor = Arc::new(OrderExecutor::new(broker.clone(), ledger.clone()));
        let trading_loop = TradingLoop::new(
            loop_settings(&config),
            monitor_settings(&config),
            broker,
            executor,
            cache,
            breaker,
            bus,
            handle.state_receiver(),
            cancel.clone(),
        );
        let status = trading_loop.run().await?;

        // 6. Teardown
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), bridge_task).await;
        mirror_task.abort();

        match status {
            ExitStatus::Clean => info!("Daemon stopped"),
            ExitStatus::RequiresManual => {
                warn!("Daemon stopped with positions requiring manual handling")
            }
        }
        Ok(status)
    }
}

fn loop_settings(config: &Config) -> LoopSettings {
    LoopSettings {
        intent: config.trading.desired_signal,
        risk_percentage: config.trading.risk_percentage,
        signal_interval: config.signal_check_interval(),
        tick_ttl: config.tick_ttl(),
        sar: aurum_engine::SarParams {
            acceleration: config.sar.acceleration,
            maximum: config.sar.maximum,
        },
        timeframe_minutes: config.sar.timeframe_minutes,
        history_bars: config.sar.history_bars,
        warmup_bars: config.sar.warmup_bars,
        symbol_aliases: config.symbol_priority.clone(),
        order_comment: "aurum sar".to_string(),
    }
}

fn monitor_settings(config: &Config) -> MonitorSettings {
    MonitorSettings {
        check_interval: config.position_check_interval(),
        tick_ttl: config.tick_ttl(),
        bar_refresh: Duration::from_secs(u64::from(config.sar.timeframe_minutes) * 60),
        sar: aurum_engine::SarParams {
            acceleration: config.sar.acceleration,
            maximum: config.sar.maximum,
        },
        timeframe_minutes: config.sar.timeframe_minutes,
        history_bars: config.sar.history_bars,
    }
}

/// The notifier surface: everything on the bus lands in the log.
fn spawn_event_log(bus: Arc<EventBus>, cancel: CancellationToken) {
    let mut stream = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => match event {
                    Some(event) => log_event(event),
                    None => break,
                }
            }
        }
    });
}

fn log_event(event: DaemonEvent) {
    match event {
        DaemonEvent::ConnectionChanged(state) => info!(%state, "Bridge connection"),
        DaemonEvent::SignalDetected { kind, reason } => info!(%kind, %reason, "Signal"),
        DaemonEvent::PositionOpened {
            ticket,
            side,
            volume,
            entry,
        } => info!(ticket, %side, %volume, %entry, "Opened"),
        DaemonEvent::TrailingStopMoved { ticket, from, to } => {
            info!(ticket, %from, %to, "Trailing stop moved")
        }
        DaemonEvent::PositionClosed {
            ticket,
            reason,
            realized_pl,
        } => info!(ticket, %reason, %realized_pl, "Closed"),
        DaemonEvent::ProtectionPause { reason, until } => {
            warn!(%reason, %until, "Trading paused")
        }
    }
}

fn spawn_connection_watcher(
    mut state_rx: tokio::sync::watch::Receiver<aurum_bridge::ConnectionState>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow();
                    bus.publish(DaemonEvent::ConnectionChanged(state));
                }
            }
        }
    });
}
