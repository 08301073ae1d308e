//! In-memory broker for tests.
//!
//! Fills immediately at a configured price, tracks live tickets, and
//! can be scripted to reject, time out, or fail a number of closes.
//! Bar responses are served from a queue so a test can let the trend
//! flip between fetches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use aurum_domain::{Bar, OpenOrderRequest};
use rust_decimal::Decimal;

use crate::error::ExecError;
use crate::ports::{BrokerPort, OrderAck};

#[derive(Debug, Clone)]
enum OpenMode {
    Fill,
    Reject(String),
    Timeout,
}

/// Scriptable broker stub.
pub struct StubBroker {
    fill_price: Decimal,
    next_ticket: AtomicI64,
    open_mode: Mutex<OpenMode>,
    close_failures_left: Mutex<u32>,
    modify_rejection: Mutex<Option<String>>,
    live_tickets: Mutex<Vec<i64>>,
    bars_script: Mutex<VecDeque<Vec<Bar>>>,
    modifies: Mutex<Vec<(i64, Decimal, Decimal)>>,
    open_calls: AtomicU32,
    close_calls: AtomicU32,
    modify_calls: AtomicU32,
    refresh_calls: AtomicU32,
}

impl StubBroker {
    pub fn new(fill_price: Decimal) -> Self {
        Self {
            fill_price,
            next_ticket: AtomicI64::new(1000),
            open_mode: Mutex::new(OpenMode::Fill),
            close_failures_left: Mutex::new(0),
            modify_rejection: Mutex::new(None),
            live_tickets: Mutex::new(Vec::new()),
            bars_script: Mutex::new(VecDeque::new()),
            modifies: Mutex::new(Vec::new()),
            open_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            modify_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    /// All further opens are rejected with the given message.
    pub fn reject_opens(&self, message: &str) {
        *self.open_mode.lock().unwrap() = OpenMode::Reject(message.to_string());
    }

    /// All further opens time out.
    pub fn timeout_opens(&self) {
        *self.open_mode.lock().unwrap() = OpenMode::Timeout;
    }

    /// The next `n` closes fail with a transport error.
    pub fn fail_closes(&self, n: u32) {
        *self.close_failures_left.lock().unwrap() = n;
    }

    /// All further modifies are rejected with the given message.
    pub fn reject_modifies(&self, message: &str) {
        *self.modify_rejection.lock().unwrap() = Some(message.to_string());
    }

    /// Queue a bar window; each `fetch_bars` pops one, the last queued
    /// window keeps repeating.
    pub fn push_bars(&self, bars: Vec<Bar>) {
        self.bars_script.lock().unwrap().push_back(bars);
    }

    /// Overwrite the set of live tickets (e.g. to simulate a
    /// broker-side close).
    pub fn set_live_tickets(&self, tickets: Vec<i64>) {
        *self.live_tickets.lock().unwrap() = tickets;
    }

    pub fn live_tickets(&self) -> Vec<i64> {
        self.live_tickets.lock().unwrap().clone()
    }

    /// Stop/target updates seen so far, oldest first.
    pub fn modifies(&self) -> Vec<(i64, Decimal, Decimal)> {
        self.modifies.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn modify_calls(&self) -> u32 {
        self.modify_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerPort for StubBroker {
    async fn open_order(&self, request: &OpenOrderRequest) -> Result<OrderAck, ExecError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let mode = self.open_mode.lock().unwrap().clone();
        match mode {
            OpenMode::Reject(message) => Err(ExecError::OrderRejected(message)),
            OpenMode::Timeout => Err(ExecError::CommandTimeout("stub timeout".to_string())),
            OpenMode::Fill => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                self.live_tickets.lock().unwrap().push(ticket);
                Ok(OrderAck {
                    ticket,
                    fill_price: self.fill_price,
                    volume: request.volume,
                    stop_loss: request.stop_loss,
                    take_profit: request.take_profit,
                })
            }
        }
    }

    async fn close_position(&self, ticket: i64) -> Result<(), ExecError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut left = self.close_failures_left.lock().unwrap();
            if *left > 0 {
                *left = left.saturating_sub(1);
                return Err(ExecError::Bridge("stub close failure".to_string()));
            }
        }

        self.live_tickets.lock().unwrap().retain(|t| *t != ticket);
        Ok(())
    }

    async fn modify_position(
        &self,
        ticket: i64,
        sl: Decimal,
        tp: Decimal,
    ) -> Result<(), ExecError> {
        self.modify_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.modify_rejection.lock().unwrap().clone() {
            return Err(ExecError::ModifyRejected { ticket, message });
        }

        self.modifies.lock().unwrap().push((ticket, sl, tp));
        Ok(())
    }

    async fn refresh_positions(&self) -> Result<Vec<i64>, ExecError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.live_tickets.lock().unwrap().clone())
    }

    async fn fetch_bars(
        &self,
        _count: u32,
        _timeframe_minutes: u32,
    ) -> Result<Vec<Bar>, ExecError> {
        let mut script = self.bars_script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script.front().cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_domain::Side;
    use rust_decimal_macros::dec;

    fn request() -> OpenOrderRequest {
        OpenOrderRequest {
            side: Side::Buy,
            volume: dec!(0.03),
            stop_loss: dec!(2195.23),
            take_profit: dec!(2280.25),
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_fill_assigns_increasing_tickets() {
        let stub = StubBroker::new(dec!(2223.57));
        let a = stub.open_order(&request()).await.unwrap();
        let b = stub.open_order(&request()).await.unwrap();
        assert!(b.ticket > a.ticket);
        assert_eq!(stub.live_tickets(), vec![a.ticket, b.ticket]);
    }

    #[tokio::test]
    async fn test_close_removes_live_ticket() {
        let stub = StubBroker::new(dec!(2223.57));
        let ack = stub.open_order(&request()).await.unwrap();
        stub.close_position(ack.ticket).await.unwrap();
        assert!(stub.live_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_bars_script_advances_and_repeats() {
        let stub = StubBroker::new(dec!(2223.57));
        stub.push_bars(vec![]);
        stub.push_bars(vec![Bar {
            time: chrono::NaiveDate::from_ymd_opt(2024, 4, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(0.5),
            close: dec!(1.5),
            tick_volume: 1,
        }]);

        assert!(stub.fetch_bars(100, 15).await.unwrap().is_empty());
        assert_eq!(stub.fetch_bars(100, 15).await.unwrap().len(), 1);
        // Last window repeats
        assert_eq!(stub.fetch_bars(100, 15).await.unwrap().len(), 1);
    }
}
