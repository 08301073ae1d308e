//! End-to-end trading flow over the stub broker: signal → open →
//! monitor → close → protection re-evaluation, plus the gates that
//! must keep the loop parked.

use std::sync::Arc;
use std::time::Duration;

use aurum_bridge::{ConnectionState, MarketDataCache};
use aurum_domain::{
    AccountSnapshot, Bar, CloseReason, Side, Tick, TradeIntent, TradeRecord, TradeStatus,
};
use aurum_engine::SarParams;
use aurum_exec::{OrderExecutor, StubBroker};
use aurum_ledger::TradeLedger;
use aurum_protect::{CircuitBreaker, CircuitBreakerConfig, DailyLossConfig};
use aurumd::{EventBus, ExitStatus, LoopSettings, MonitorSettings, TradingLoop};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn gold_tick() -> Tick {
    Tick {
        symbol: "XAUUSD".to_string(),
        bid: dec!(2240.00),
        ask: dec!(2240.20),
        spread: 20,
        time: NaiveDate::from_ymd_opt(2024, 4, 2)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap(),
        point: dec!(0.01),
        digits: 2,
        contract_size: dec!(100),
        min_lot: dec!(0.01),
        max_lot: dec!(100),
        lot_step: dec!(0.01),
    }
}

fn gold_account() -> AccountSnapshot {
    AccountSnapshot {
        balance: dec!(10000),
        equity: dec!(10000),
        margin: Decimal::ZERO,
        free_margin: dec!(10000),
        profit: Decimal::ZERO,
        leverage: 100,
        open_positions: 0,
    }
}

fn uptrend_bars(n: usize) -> Vec<Bar> {
    let base = NaiveDate::from_ymd_opt(2024, 4, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n)
        .map(|i| {
            let level = 2150.0 + i as f64 * 1.5;
            Bar {
                time: base + ChronoDuration::minutes(15 * i as i64),
                open: Decimal::try_from(level).unwrap(),
                high: Decimal::try_from(level + 2.0).unwrap(),
                low: Decimal::try_from(level - 1.0).unwrap(),
                close: Decimal::try_from(level + 1.5).unwrap(),
                tick_volume: 100,
            }
        })
        .collect()
}

fn flipped_bars(n: usize) -> Vec<Bar> {
    let mut bars = uptrend_bars(n);
    let last = bars.last().unwrap().clone();
    let crash_low = last.low - Decimal::from(40);
    bars.push(Bar {
        time: last.time + ChronoDuration::minutes(15),
        open: last.close,
        high: last.close,
        low: crash_low,
        close: crash_low + Decimal::ONE,
        tick_volume: 100,
    });
    bars
}

fn loop_settings(intent: TradeIntent) -> LoopSettings {
    LoopSettings {
        intent,
        risk_percentage: Decimal::ONE,
        signal_interval: Duration::from_millis(10),
        tick_ttl: Duration::from_secs(60),
        sar: SarParams::default(),
        timeframe_minutes: 15,
        history_bars: 100,
        warmup_bars: 50,
        symbol_aliases: vec!["XAUUSD".to_string()],
        order_comment: "sar trend".to_string(),
    }
}

fn monitor_settings() -> MonitorSettings {
    MonitorSettings {
        check_interval: Duration::from_millis(10),
        tick_ttl: Duration::from_secs(60),
        bar_refresh: Duration::from_millis(0),
        sar: SarParams::default(),
        timeframe_minutes: 15,
        history_bars: 100,
    }
}

struct Harness {
    _dir: TempDir,
    _state_tx: watch::Sender<ConnectionState>,
    ledger: Arc<TradeLedger>,
    broker: Arc<StubBroker>,
    breaker: Arc<tokio::sync::Mutex<CircuitBreaker>>,
    cache: Arc<MarketDataCache>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<ExitStatus, aurumd::DaemonError>>,
}

fn start(intent: TradeIntent, preload: impl FnOnce(&TradeLedger)) -> Harness {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(TradeLedger::new(dir.path()).unwrap());
    preload(&ledger);

    let broker = Arc::new(StubBroker::new(dec!(2240.20)));
    let executor = Arc::new(OrderExecutor::new(broker.clone(), ledger.clone()));
    let cache = Arc::new(MarketDataCache::new());
    cache.record_market_data(gold_tick(), gold_account());

    let breaker = Arc::new(tokio::sync::Mutex::new(
        CircuitBreaker::load(
            dir.path().join("circuit_breaker_state.json"),
            CircuitBreakerConfig::default(),
            DailyLossConfig::default(),
            ledger.clone(),
            Local::now(),
        )
        .unwrap(),
    ));

    let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);

    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let trading_loop = TradingLoop::new(
        loop_settings(intent),
        monitor_settings(),
        broker.clone(),
        executor,
        cache.clone(),
        breaker.clone(),
        bus,
        state_rx,
        cancel.clone(),
    );
    let task = tokio::spawn(trading_loop.run());

    Harness {
        _dir: dir,
        _state_tx: state_tx,
        ledger,
        broker,
        breaker,
        cache,
        cancel,
        task,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn losing_record(ticket: i64, minutes_ago: i64) -> TradeRecord {
    TradeRecord::open(
        ticket,
        "XAUUSD".to_string(),
        Side::Buy,
        Local::now() - ChronoDuration::minutes(minutes_ago),
        dec!(2240.20),
        dec!(0.10),
        dec!(2234.50),
        dec!(2251.60),
        dec!(100),
        dec!(10000),
        String::new(),
    )
}

#[tokio::test]
async fn test_full_cycle_open_trail_reverse_close() {
    let harness = start(TradeIntent::Buy, |_| {});

    // First window opens the BUY, second flips the trend
    harness.broker.push_bars(uptrend_bars(60));
    harness.broker.push_bars(flipped_bars(61));

    let ledger = harness.ledger.clone();
    let today = Local::now().date_naive();
    wait_until(move || {
        ledger
            .trades_for(today)
            .map(|records| records.iter().any(|r| r.is_closed()))
            .unwrap_or(false)
    })
    .await;

    harness.cancel.cancel();
    let status = harness.task.await.unwrap().unwrap();
    assert_eq!(status, ExitStatus::Clean);

    let records = harness.ledger.trades_for(today).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, TradeStatus::Closed);
    assert_eq!(record.side, Side::Buy);
    assert_eq!(record.close_reason, Some(CloseReason::SarReversal));
    assert_eq!(record.entry_price, dec!(2240.20));
    assert_eq!(record.account_balance_at_entry, dec!(10000));
    // Stop sat at the SAR level, below the entry
    assert!(record.stop_loss < record.entry_price);
    // Target doubled the stop distance
    let risk = record.entry_price - record.stop_loss;
    assert_eq!(record.take_profit, (record.entry_price + risk * dec!(2)).round_dp(2));

    assert_eq!(harness.broker.open_calls(), 1);
    assert_eq!(harness.broker.close_calls(), 1);

    // The close fed the protection gates
    let breaker = harness.breaker.lock().await;
    assert_eq!(breaker.state().consecutive_losses, 1);
}

#[tokio::test]
async fn test_hold_signal_never_opens() {
    let harness = start(TradeIntent::Sell, |_| {});
    // Uptrend while only SELL is allowed: permanent HOLD
    harness.broker.push_bars(uptrend_bars(60));

    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.cancel.cancel();
    let status = harness.task.await.unwrap().unwrap();

    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(harness.broker.open_calls(), 0);
}

#[tokio::test]
async fn test_warmup_gate_blocks_first_decision() {
    let harness = start(TradeIntent::Buy, |_| {});
    // Only 10 bars of history: below the 50-bar warm-up
    harness.broker.push_bars(uptrend_bars(10));

    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.cancel.cancel();
    let status = harness.task.await.unwrap().unwrap();

    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(harness.broker.open_calls(), 0);
}

#[tokio::test]
async fn test_consecutive_losses_park_the_loop() {
    let harness = start(TradeIntent::Buy, |ledger| {
        for i in 0..5 {
            let record = ledger.log_open(losing_record(100 + i, 60 - i)).unwrap();
            ledger
                .log_close(
                    record.ticket,
                    dec!(2234.50),
                    Local::now() - ChronoDuration::minutes(30 - i),
                    dec!(-57),
                    CloseReason::SlHit,
                )
                .unwrap();
        }
    });
    harness.broker.push_bars(uptrend_bars(60));

    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.cancel.cancel();
    harness.task.await.unwrap().unwrap();

    assert_eq!(harness.broker.open_calls(), 0);
    let breaker = harness.breaker.lock().await;
    assert!(breaker.state().is_paused);
    assert_eq!(breaker.state().consecutive_losses, 0); // recomputed on close only
}

#[tokio::test]
async fn test_requires_manual_blocks_opens() {
    let harness = start(TradeIntent::Buy, |ledger| {
        ledger.log_open(losing_record(500, 30)).unwrap();
        ledger
            .mark_requires_manual(500, Local::now().date_naive())
            .unwrap();
    });
    harness.broker.push_bars(uptrend_bars(60));

    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.cancel.cancel();
    let status = harness.task.await.unwrap().unwrap();

    assert_eq!(status, ExitStatus::RequiresManual);
    assert_eq!(harness.broker.open_calls(), 0);
}

#[tokio::test]
async fn test_stale_tick_defers_decisions() {
    let harness = start(TradeIntent::Buy, |_| {});
    harness.broker.push_bars(uptrend_bars(60));

    // Replace the cache contents with nothing fresh
    harness.cache.clear_on_disconnect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.cancel.cancel();
    let status = harness.task.await.unwrap().unwrap();

    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(harness.broker.open_calls(), 0);
}
