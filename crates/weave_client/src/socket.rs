//! The client socket channel.
//!
//! One logical connection per device. The watchdog state machine
//! ([`SocketChannel`]) decides on every fixed tick whether to reconnect or
//! to force-terminate a half-closed socket; the async driver
//! ([`spawn_socket`]) carries those decisions out against a real
//! WebSocket.

use crate::config::ClientConfig;
use crate::error::ClientResult;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use weave_protocol::{ClientMessage, ServerMessage};

/// Connection state of the socket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket.
    Closed,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and handshaken.
    Open,
    /// A close handshake is in flight.
    Closing,
}

/// What the watchdog decided on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to do.
    Wait,
    /// Start a new connection.
    Reconnect,
    /// The socket sat in `Closing` too long; terminate it.
    ForceTerminate,
}

/// Watchdog state machine for one device's socket.
///
/// Liveness uses a bounded counter of consecutive checks spent in
/// `Closing`, not a wall-clock timeout: a socket that never finishes its
/// close handshake is force-terminated after `max_closing_checks` ticks,
/// which prevents leaking half-closed sockets.
pub struct SocketChannel {
    state: Mutex<ChannelState>,
    closing_checks: AtomicU32,
    max_closing_checks: u32,
}

impl SocketChannel {
    /// Creates a closed channel.
    pub fn new(max_closing_checks: u32) -> Self {
        Self {
            state: Mutex::new(ChannelState::Closed),
            closing_checks: AtomicU32::new(0),
            max_closing_checks,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Sets the state. The driver owns transitions; tests use this to
    /// exercise the watchdog.
    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    /// Runs one watchdog check.
    pub fn tick(&self) -> TickAction {
        match self.state() {
            ChannelState::Open => {
                self.closing_checks.store(0, Ordering::SeqCst);
                TickAction::Wait
            }
            ChannelState::Connecting => TickAction::Wait,
            ChannelState::Closed => {
                self.closing_checks.store(0, Ordering::SeqCst);
                TickAction::Reconnect
            }
            ChannelState::Closing => {
                let checks = self.closing_checks.fetch_add(1, Ordering::SeqCst) + 1;
                if checks >= self.max_closing_checks {
                    TickAction::ForceTerminate
                } else {
                    TickAction::Wait
                }
            }
        }
    }
}

/// Supplies single-use socket ids from the prior handshake call.
///
/// Each reconnect needs a fresh id; the call that issues one happens
/// outside the socket (and outside this crate's scope), behind this seam.
pub trait SocketIdProvider: Send + Sync {
    /// Obtains a fresh socket id.
    fn issue(&self) -> ClientResult<String>;
}

/// Handle to a running socket channel.
pub struct SocketHandle {
    /// Frames to send; queued here while disconnected and drained once
    /// the socket is open.
    pub outgoing: mpsc::UnboundedSender<ClientMessage>,
    /// Frames received from the server.
    pub incoming: mpsc::UnboundedReceiver<ServerMessage>,
    channel: Arc<SocketChannel>,
    driver: JoinHandle<()>,
}

impl SocketHandle {
    /// Returns the watchdog channel.
    pub fn channel(&self) -> &Arc<SocketChannel> {
        &self.channel
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Stops the driver and closes the socket.
    pub fn dispose(&self) {
        self.driver.abort();
        self.channel.set_state(ChannelState::Closed);
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the socket driver. Must run inside a tokio runtime.
pub fn spawn_socket(config: ClientConfig, provider: Arc<dyn SocketIdProvider>) -> SocketHandle {
    let channel = Arc::new(SocketChannel::new(config.max_closing_checks));
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    let driver = tokio::spawn(run_channel(
        config,
        provider,
        Arc::clone(&channel),
        outgoing_rx,
        incoming_tx,
    ));

    SocketHandle {
        outgoing: outgoing_tx,
        incoming: incoming_rx,
        channel,
        driver,
    }
}

async fn run_channel(
    config: ClientConfig,
    provider: Arc<dyn SocketIdProvider>,
    channel: Arc<SocketChannel>,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    incoming: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut watchdog = tokio::time::interval(config.watchdog_tick);
    let mut attempt: u32 = 0;

    loop {
        watchdog.tick().await;
        if incoming.is_closed() {
            break;
        }

        match channel.tick() {
            TickAction::Wait => {}
            TickAction::ForceTerminate => {
                warn!("socket stuck in closing; force-terminating");
                channel.set_state(ChannelState::Closed);
            }
            TickAction::Reconnect => {
                let delay = config.backoff.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                channel.set_state(ChannelState::Connecting);
                match open_connection(&config, provider.as_ref()).await {
                    Ok(ws) => {
                        attempt = 0;
                        channel.set_state(ChannelState::Open);
                        debug!(url = %config.server_url, "socket open");

                        run_connection(ws, &config, &channel, &mut outgoing, &incoming).await;

                        if channel.state() != ChannelState::Closing {
                            channel.set_state(ChannelState::Closed);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "connect failed");
                        channel.set_state(ChannelState::Closed);
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }
}

async fn open_connection(
    config: &ClientConfig,
    provider: &dyn SocketIdProvider,
) -> ClientResult<WsStream> {
    let socket_id = provider.issue()?;
    let (mut ws, _) = connect_async(config.server_url.as_str()).await?;

    let frame = serde_json::to_string(&ClientMessage::Handshake { socket_id })?;
    ws.send(Message::Text(frame)).await?;
    Ok(ws)
}

async fn run_connection(
    ws: WsStream,
    config: &ClientConfig,
    channel: &Arc<SocketChannel>,
    outgoing: &mut mpsc::UnboundedReceiver<ClientMessage>,
    incoming: &mpsc::UnboundedSender<ServerMessage>,
) {
    let (mut sink, mut frames) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if incoming.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "discarding malformed frame"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    channel.set_state(ChannelState::Closing);
                    if sink.close().await.is_ok() {
                        channel.set_state(ChannelState::Closed);
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket read failed");
                    break;
                }
                None => break,
            },
            message = outgoing.recv() => match message {
                Some(message) => {
                    let frame = match serde_json::to_string(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize outgoing frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        warn!(error = %e, "socket write failed");
                        break;
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                match serde_json::to_string(&ClientMessage::Heartbeat) {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize heartbeat"),
                }
            }
        }
    }
}
