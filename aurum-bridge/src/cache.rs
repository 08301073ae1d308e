//! Latest-wins market-data cache.
//!
//! Written by the bridge connection task as frames arrive, read by the
//! trading loop and position monitor. Each field is guarded on its
//! own; writes are atomic at the record level and readers always see
//! the most recent complete value.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use aurum_domain::{AccountSnapshot, Bar, Position, Tick};

struct TickEntry {
    tick: Tick,
    seen: Instant,
}

struct PositionEntry {
    position: Position,
    last_seen: Instant,
}

/// Shared cache of the freshest terminal-reported state.
#[derive(Default)]
pub struct MarketDataCache {
    tick: RwLock<Option<TickEntry>>,
    account: RwLock<Option<AccountSnapshot>>,
    positions: RwLock<HashMap<i64, PositionEntry>>,
    bars: RwLock<HashMap<(String, u32), Vec<Bar>>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh tick and its embedded account snapshot.
    pub fn record_market_data(&self, tick: Tick, account: AccountSnapshot) {
        *self.tick.write().unwrap() = Some(TickEntry {
            tick,
            seen: Instant::now(),
        });
        *self.account.write().unwrap() = Some(account);
    }

    /// Most recent tick, regardless of age.
    pub fn latest_tick(&self) -> Option<Tick> {
        self.tick.read().unwrap().as_ref().map(|e| e.tick.clone())
    }

    /// Most recent tick only if it arrived within `ttl`.
    pub fn fresh_tick(&self, ttl: Duration) -> Option<Tick> {
        self.tick
            .read()
            .unwrap()
            .as_ref()
            .filter(|e| e.seen.elapsed() <= ttl)
            .map(|e| e.tick.clone())
    }

    /// Whether a tick arrived within `ttl`.
    pub fn fresh_within(&self, ttl: Duration) -> bool {
        self.fresh_tick(ttl).is_some()
    }

    pub fn latest_account(&self) -> Option<AccountSnapshot> {
        self.account.read().unwrap().clone()
    }

    /// Insert or refresh a position report. The first-seen time of an
    /// existing entry is preserved so position age survives re-reports.
    pub fn upsert_position(&self, position: Position) {
        let mut positions = self.positions.write().unwrap();
        let entry = positions.entry(position.ticket);
        match entry {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let opened_at = occupied.get().position.opened_at;
                let mut position = position;
                position.opened_at = opened_at;
                *occupied.get_mut() = PositionEntry {
                    position,
                    last_seen: Instant::now(),
                };
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(PositionEntry {
                    position,
                    last_seen: Instant::now(),
                });
            }
        }
    }

    pub fn position(&self, ticket: i64) -> Option<Position> {
        self.positions
            .read()
            .unwrap()
            .get(&ticket)
            .map(|e| e.position.clone())
    }

    /// Tickets re-reported since the given instant. Used after a
    /// position refresh round-trip to tell live positions from ones
    /// the broker has already closed.
    pub fn tickets_seen_since(&self, since: Instant) -> Vec<i64> {
        self.positions
            .read()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.last_seen >= since)
            .map(|(ticket, _)| *ticket)
            .collect()
    }

    /// Store the latest bar window for a (symbol, timeframe) pair.
    pub fn store_bars(&self, symbol: String, timeframe_minutes: u32, bars: Vec<Bar>) {
        self.bars
            .write()
            .unwrap()
            .insert((symbol, timeframe_minutes), bars);
    }

    pub fn bars(&self, symbol: &str, timeframe_minutes: u32) -> Option<Vec<Bar>> {
        self.bars
            .read()
            .unwrap()
            .get(&(symbol.to_string(), timeframe_minutes))
            .cloned()
    }

    /// Forget connection-scoped state after the EA drops. Bars are
    /// kept — history does not go stale with the connection.
    pub fn clear_on_disconnect(&self) {
        *self.tick.write().unwrap() = None;
        self.positions.write().unwrap().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_domain::Side;
    use chrono::{Local, NaiveDate};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample_tick() -> Tick {
        Tick {
            symbol: "XAUUSD".to_string(),
            bid: dec!(2223.37),
            ask: dec!(2223.57),
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

    fn sample_account() -> AccountSnapshot {
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

    fn sample_position(ticket: i64) -> Position {
        Position {
            ticket,
            symbol: "XAUUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.03),
            price_open: dec!(2223.57),
            price_current: dec!(2223.57),
            sl: dec!(2195.23),
            tp: dec!(2280.25),
            profit: Decimal::ZERO,
            comment: String::new(),
            opened_at: Local::now(),
        }
    }

    #[test]
    fn test_latest_wins() {
        let cache = MarketDataCache::new();
        assert!(cache.latest_tick().is_none());

        cache.record_market_data(sample_tick(), sample_account());
        let mut newer = sample_tick();
        newer.bid = dec!(2224.00);
        cache.record_market_data(newer, sample_account());

        assert_eq!(cache.latest_tick().unwrap().bid, dec!(2224.00));
    }

    #[test]
    fn test_freshness_window() {
        let cache = MarketDataCache::new();
        cache.record_market_data(sample_tick(), sample_account());

        assert!(cache.fresh_within(Duration::from_secs(10)));
        assert!(cache.fresh_tick(Duration::from_secs(10)).is_some());
    }

    #[test]
    fn test_empty_cache_is_never_fresh() {
        let cache = MarketDataCache::new();
        assert!(!cache.fresh_within(Duration::from_secs(3600)));
    }

    #[test]
    fn test_position_upsert_preserves_first_seen() {
        let cache = MarketDataCache::new();
        let first = sample_position(42);
        let opened_at = first.opened_at;
        cache.upsert_position(first);

        let mut update = sample_position(42);
        update.price_current = dec!(2230.00);
        update.opened_at = Local::now() + chrono::Duration::hours(1);
        cache.upsert_position(update);

        let stored = cache.position(42).unwrap();
        assert_eq!(stored.price_current, dec!(2230.00));
        assert_eq!(stored.opened_at, opened_at);
    }

    #[test]
    fn test_tickets_seen_since() {
        let cache = MarketDataCache::new();
        cache.upsert_position(sample_position(1));
        let mark = Instant::now();
        cache.upsert_position(sample_position(2));

        let seen = cache.tickets_seen_since(mark);
        assert!(seen.contains(&2));
        assert!(!seen.contains(&1) || seen.len() == 2); // instant granularity
    }

    #[test]
    fn test_disconnect_clears_connection_state() {
        let cache = MarketDataCache::new();
        cache.record_market_data(sample_tick(), sample_account());
        cache.upsert_position(sample_position(1));
        cache.store_bars("XAUUSD".to_string(), 15, vec![]);

        cache.clear_on_disconnect();
        assert!(cache.latest_tick().is_none());
        assert!(cache.position(1).is_none());
        // Bars survive the disconnect
        assert!(cache.bars("XAUUSD", 15).is_some());
    }
}
