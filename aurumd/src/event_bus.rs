//! Daemon event stream.
//!
//! Fan-out channel for everything an external observer (log surface,
//! notifier, dashboard) may care about: connection transitions,
//! signals, position lifecycle, protection pauses. Backed by a tokio
//! broadcast channel. A stream that falls behind skips ahead to the
//! oldest retained event; the gap is counted on the stream and logged,
//! never surfaced to the consumer — trading must not slow down or
//! branch on a sluggish observer.

use aurum_bridge::ConnectionState;
use aurum_domain::{CloseReason, Side, SignalKind};
use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Events published by the daemon.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Bridge connection transitioned
    ConnectionChanged(ConnectionState),

    /// A non-HOLD signal was produced
    SignalDetected { kind: SignalKind, reason: String },

    /// A position was opened and logged
    PositionOpened {
        ticket: i64,
        side: Side,
        volume: Decimal,
        entry: Decimal,
    },

    /// The trailing stop moved in the position's favor
    TrailingStopMoved {
        ticket: i64,
        from: Decimal,
        to: Decimal,
    },

    /// A position was closed and logged
    PositionClosed {
        ticket: i64,
        reason: CloseReason,
        realized_pl: Decimal,
    },

    /// A protection gate engaged a pause
    ProtectionPause {
        reason: String,
        until: DateTime<Local>,
    },
}

/// Broadcast bus for daemon events.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` events per slow stream.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all subscribed streams. Publishing with nobody
    /// listening is normal (observers are optional).
    pub fn publish(&self, event: DaemonEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Open a new stream starting at the next published event.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// One subscriber's view of the event stream.
pub struct EventStream {
    receiver: broadcast::Receiver<DaemonEvent>,
    missed: u64,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the bus is gone.
    ///
    /// A lagged stream resumes at the oldest event still retained; the
    /// skipped count accumulates in [`EventStream::missed`].
    pub async fn next(&mut self) -> Option<DaemonEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!(skipped, "Event stream lagged, skipping ahead");
                }
            }
        }
    }

    /// Non-blocking variant of [`EventStream::next`]; `None` when no
    /// event is ready or the bus is gone.
    pub fn try_next(&mut self) -> Option<DaemonEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!(skipped, "Event stream lagged, skipping ahead");
                }
            }
        }
    }

    /// Total events this stream has skipped due to lag.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

// =============================================================================
// Tests
// =============================================================================
