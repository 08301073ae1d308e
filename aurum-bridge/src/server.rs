//! Bridge server: connection lifecycle, framing, and command
//! correlation.
//!
//! One EA connection at a time; a new connection supersedes the old
//! one. Frames are processed in arrival order by a single reader task,
//! which is also the only writer of the market-data cache. Outgoing
//! commands are serialized — one command completes (ack or timeout)
//! before the next is sent — so the next `order_result` / `response` /
//! `rates` frame always belongs to the in-flight command.
//!
//! Connection states: LISTENING → CONNECTED → DEGRADED (silence past
//! twice the heartbeat interval) → CONNECTED on resumed traffic, or →
//! CLOSED (silence past three intervals, read error, malformed-frame
//! burst) → LISTENING.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aurum_domain::{Bar, OpenOrderRequest, Side};
use chrono::Local;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aurum_exec::{BrokerPort, ExecError, OrderAck};

use crate::cache::MarketDataCache;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{EaCommand, EaFrame, OrderResultFrame, ResponseFrame, ResponseStatus};

/// Bridge endpoint and timing settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Expected EA heartbeat cadence; silence beyond two intervals
    /// degrades the connection, beyond three closes it
    pub heartbeat_interval: Duration,
    /// How long a command waits for its reply
    pub command_timeout: Duration,
    /// Consecutive malformed frames that force a connection reset
    pub max_consecutive_malformed: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            heartbeat_interval: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            max_consecutive_malformed: 10,
        }
    }
}

/// Connection lifecycle state, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Connected,
    Degraded,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Listening => "LISTENING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Degraded => "DEGRADED",
            ConnectionState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Reply frame correlated to an in-flight command.
#[derive(Debug)]
enum Reply {
    OrderResult(OrderResultFrame),
    Response(ResponseFrame),
    Rates(Vec<Bar>),
}

struct Shared {
    config: BridgeConfig,
    cache: Arc<MarketDataCache>,
    local_addr: SocketAddr,
    state_tx: watch::Sender<ConnectionState>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    reply_slot: Mutex<Option<oneshot::Sender<Reply>>>,
    last_traffic: Mutex<Instant>,
    /// Bumped per accepted connection; a superseded connection skips
    /// teardown of state it no longer owns
    generation: AtomicU64,
}

/// Listener setup and the accept loop.
pub struct BridgeServer;

impl BridgeServer {
    /// Bind the endpoint and start accepting EA connections.
    ///
    /// # Errors
    ///
    /// `BridgeError::Bind` when the endpoint cannot be bound; this is
    /// unrecoverable for the process.
    pub async fn spawn(
        config: BridgeConfig,
        cancel: CancellationToken,
    ) -> BridgeResult<(BridgeHandle, JoinHandle<()>)> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(BridgeError::Bind)?;
        let local_addr = listener.local_addr().map_err(BridgeError::Bind)?;

        info!(%local_addr, "Bridge listening for EA connection");

        let (state_tx, _) = watch::channel(ConnectionState::Listening);
        let shared = Arc::new(Shared {
            config,
            cache: Arc::new(MarketDataCache::new()),
            local_addr,
            state_tx,
            outgoing: Mutex::new(None),
            reply_slot: Mutex::new(None),
            last_traffic: Mutex::new(Instant::now()),
            generation: AtomicU64::new(0),
        });

        let handle = BridgeHandle {
            shared: shared.clone(),
            command_gate: Arc::new(tokio::sync::Mutex::new(())),
        };
        let task = tokio::spawn(accept_loop(listener, shared, cancel));
        Ok((handle, task))
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut current: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "EA connected");
                    if let Some(prev) = current.take() {
                        info!("Superseding previous EA connection");
                        prev.cancel();
                    }
                    let conn_cancel = cancel.child_token();
                    current = Some(conn_cancel.clone());
                    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::spawn(run_connection(stream, shared.clone(), conn_cancel, generation));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    shared.state_tx.send_replace(ConnectionState::Closed);
}

async fn run_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    generation: u64,
) {
    let (read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel::<String>(64);

    *shared.outgoing.lock().unwrap() = Some(out_tx);
    *shared.last_traffic.lock().unwrap() = Instant::now();
    transition(&shared, ConnectionState::Connected);

    let writer = tokio::spawn(write_loop(write_half, out_rx, cancel.clone()));
    let reason = read_loop(read_half, &shared, &cancel).await;

    info!(reason, "EA connection ended");
    writer.abort();

    // Only the current connection owns the shared teardown; a
    // superseded one must not clobber its successor's state.
    if shared.generation.load(Ordering::SeqCst) == generation {
        *shared.outgoing.lock().unwrap() = None;
        *shared.reply_slot.lock().unwrap() = None;
        shared.cache.clear_on_disconnect();
        transition(&shared, ConnectionState::Closed);
        transition(&shared, ConnectionState::Listening);
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = out_rx.recv() => match msg {
                Some(line) => {
                    if write_half.write_all(line.as_bytes()).await.is_err()
                        || write_half.write_all(b"\n").await.is_err()
                    {
                        warn!("Write to EA failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
) -> &'static str {
    let mut lines = BufReader::new(read_half).lines();
    let mut malformed = 0u32;
    let mut watchdog = tokio::time::interval(shared.config.heartbeat_interval);
    let close_after = shared.config.heartbeat_interval * 3;
    let degrade_after = shared.config.heartbeat_interval * 2;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return "superseded or shutting down",
            _ = watchdog.tick() => {
                let idle = shared.last_traffic.lock().unwrap().elapsed();
                if idle >= close_after {
                    warn!(idle_secs = idle.as_secs(), "Heartbeat timeout");
                    return "heartbeat timeout";
                }
                if idle >= degrade_after && *shared.state_tx.borrow() == ConnectionState::Connected {
                    warn!(idle_secs = idle.as_secs(), "Missed heartbeats");
                    transition(shared, ConnectionState::Degraded);
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    *shared.last_traffic.lock().unwrap() = Instant::now();
                    if *shared.state_tx.borrow() == ConnectionState::Degraded {
                        info!("Traffic resumed");
                        transition(shared, ConnectionState::Connected);
                    }

                    match serde_json::from_str::<EaFrame>(line) {
                        Ok(frame) => {
                            malformed = 0;
                            handle_frame(shared, frame);
                        }
                        Err(e) => {
                            malformed += 1;
                            warn!(error = %e, consecutive = malformed, "Dropping malformed frame");
                            if malformed >= shared.config.max_consecutive_malformed {
                                return "malformed frame burst";
                            }
                        }
                    }
                }
                Ok(None) => return "EA closed the connection",
                Err(e) => {
                    warn!(error = %e, "Read error");
                    return "read error";
                }
            }
        }
    }
}

fn handle_frame(shared: &Arc<Shared>, frame: EaFrame) {
    match frame {
        EaFrame::MarketData(md) => {
            let (tick, account) = md.split();
            shared.cache.record_market_data(tick, account);
        }
        EaFrame::Position(p) => {
            shared.cache.upsert_position(p.into_position(Local::now()));
        }
        EaFrame::Heartbeat(_) => {
            debug!("Heartbeat");
        }
        EaFrame::OrderResult(r) => deliver(shared, Reply::OrderResult(r)),
        EaFrame::Response(r) => deliver(shared, Reply::Response(r)),
        EaFrame::Rates(r) => deliver(shared, Reply::Rates(r.into_bars())),
    }
}

fn deliver(shared: &Arc<Shared>, reply: Reply) {
    match shared.reply_slot.lock().unwrap().take() {
        Some(sender) => {
            let _ = sender.send(reply);
        }
        None => debug!("Unsolicited reply frame dropped"),
    }
}

fn transition(shared: &Arc<Shared>, next: ConnectionState) {
    let prev = shared.state_tx.send_replace(next);
    if prev != next {
        info!(from = %prev, to = %next, "Bridge state");
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Caller-facing side of the bridge: cache access, connection state,
/// and the serialized command channel.
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
    command_gate: Arc<tokio::sync::Mutex<()>>,
}

impl BridgeHandle {
    pub fn cache(&self) -> Arc<MarketDataCache> {
        self.shared.cache.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send one command and await its reply. Commands are serialized
    /// by an internal gate so replies correlate FIFO.
    async fn send_command(&self, command: &EaCommand) -> BridgeResult<Reply> {
        let _gate = self.command_gate.lock().await;

        let out_tx = shared_sender(&self.shared).ok_or(BridgeError::NotConnected)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        *self.shared.reply_slot.lock().unwrap() = Some(reply_tx);

        let line = serde_json::to_string(command)?;
        debug!(action = command.describe(), "Sending command");
        if out_tx.send(line).await.is_err() {
            *self.shared.reply_slot.lock().unwrap() = None;
            return Err(BridgeError::NotConnected);
        }

        match tokio::time::timeout(self.shared.config.command_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => {
                *self.shared.reply_slot.lock().unwrap() = None;
                warn!(action = command.describe(), "Command timed out");
                Err(BridgeError::CommandTimeout(command.describe().to_string()))
            }
        }
    }
}

fn shared_sender(shared: &Shared) -> Option<mpsc::Sender<String>> {
    shared.outgoing.lock().unwrap().clone()
}

fn to_exec_error(e: BridgeError) -> ExecError {
    match e {
        BridgeError::NotConnected => ExecError::NotConnected,
        BridgeError::CommandTimeout(what) => ExecError::CommandTimeout(what),
        other => ExecError::Bridge(other.to_string()),
    }
}

#[async_trait]
impl BrokerPort for BridgeHandle {
    async fn open_order(&self, request: &OpenOrderRequest) -> Result<OrderAck, ExecError> {
        let command = match request.side {
            Side::Buy => EaCommand::Buy {
                volume: request.volume,
                sl: request.stop_loss,
                tp: request.take_profit,
                comment: request.comment.clone(),
            },
            Side::Sell => EaCommand::Sell {
                volume: request.volume,
                sl: request.stop_loss,
                tp: request.take_profit,
                comment: request.comment.clone(),
            },
        };

        match self.send_command(&command).await.map_err(to_exec_error)? {
            Reply::OrderResult(r) if r.success => Ok(OrderAck {
                ticket: r.ticket,
                fill_price: r.price,
                volume: if r.volume > Decimal::ZERO {
                    r.volume
                } else {
                    request.volume
                },
                stop_loss: if r.sl > Decimal::ZERO {
                    r.sl
                } else {
                    request.stop_loss
                },
                take_profit: if r.tp > Decimal::ZERO {
                    r.tp
                } else {
                    request.take_profit
                },
            }),
            Reply::OrderResult(r) => Err(ExecError::OrderRejected(
                r.error.unwrap_or_else(|| "order failed".to_string()),
            )),
            Reply::Response(r) => Err(ExecError::OrderRejected(r.message)),
            other => Err(ExecError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    async fn close_position(&self, ticket: i64) -> Result<(), ExecError> {
        match self
            .send_command(&EaCommand::Close { ticket })
            .await
            .map_err(to_exec_error)?
        {
            Reply::Response(r) if r.status == ResponseStatus::Success => Ok(()),
            Reply::Response(r) => Err(ExecError::OrderRejected(r.message)),
            other => Err(ExecError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    async fn modify_position(
        &self,
        ticket: i64,
        sl: Decimal,
        tp: Decimal,
    ) -> Result<(), ExecError> {
        match self
            .send_command(&EaCommand::Modify { ticket, sl, tp })
            .await
            .map_err(to_exec_error)?
        {
            Reply::Response(r) if r.status == ResponseStatus::Success => Ok(()),
            Reply::Response(r) => Err(ExecError::ModifyRejected {
                ticket,
                message: r.message,
            }),
            other => Err(ExecError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    async fn refresh_positions(&self) -> Result<Vec<i64>, ExecError> {
        let since = Instant::now();
        match self
            .send_command(&EaCommand::GetPositions)
            .await
            .map_err(to_exec_error)?
        {
            Reply::Response(r) if r.status == ResponseStatus::Success => {
                Ok(self.shared.cache.tickets_seen_since(since))
            }
            Reply::Response(r) => Err(ExecError::Bridge(r.message)),
            other => Err(ExecError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    async fn fetch_bars(
        &self,
        count: u32,
        timeframe_minutes: u32,
    ) -> Result<Vec<Bar>, ExecError> {
        match self
            .send_command(&EaCommand::GetRates {
                count,
                timeframe: timeframe_minutes,
            })
            .await
            .map_err(to_exec_error)?
        {
            Reply::Rates(bars) => {
                let symbol = self
                    .shared
                    .cache
                    .latest_tick()
                    .map(|t| t.symbol)
                    .unwrap_or_default();
                self.shared
                    .cache
                    .store_bars(symbol, timeframe_minutes, bars.clone());
                Ok(bars)
            }
            Reply::Response(r) => Err(ExecError::Bridge(r.message)),
            other => Err(ExecError::UnexpectedReply(format!("{:?}", other))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
