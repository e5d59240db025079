//! WebSocket transport: socket-id registry and connection handling.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::mutations::MutationHandler;
use crate::session::Session;
use crate::store::ServerStore;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weave_bus::{Event, EventBus};
use weave_model::UserId;
use weave_protocol::{ClientMessage, ServerMessage};

/// Issues short-lived, single-use socket ids.
///
/// A prior handshake call (outside the socket) authenticates the user and
/// issues an id here; the first frame on a new socket must present it.
/// Claiming an id consumes it.
#[derive(Default)]
pub struct SocketRegistry {
    pending: Mutex<HashMap<String, UserId>>,
}

impl SocketRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a socket id for an authenticated user.
    pub fn issue(&self, user_id: UserId) -> String {
        let socket_id = Uuid::new_v4().to_string();
        self.pending.lock().insert(socket_id.clone(), user_id);
        socket_id
    }

    /// Claims a socket id, consuming it.
    pub fn claim(&self, socket_id: &str) -> Option<UserId> {
        self.pending.lock().remove(socket_id)
    }

    /// Returns the number of unclaimed ids.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// The WebSocket sync server.
///
/// One socket per device. Each connection gets its own task, its own
/// [`Session`], and its own bus subscription; messages dispatch by the
/// envelope's `type` discriminator.
pub struct SocketServer {
    config: ServerConfig,
    store: Arc<ServerStore>,
    mutations: Arc<MutationHandler>,
    bus: Arc<EventBus>,
    registry: Arc<SocketRegistry>,
    shutdown: broadcast::Sender<()>,
}

impl SocketServer {
    /// Creates a server over the given services.
    pub fn new(
        config: ServerConfig,
        store: Arc<ServerStore>,
        mutations: Arc<MutationHandler>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            store,
            mutations,
            bus,
            registry: Arc::new(SocketRegistry::new()),
            shutdown,
        }
    }

    /// Returns the socket-id registry.
    pub fn registry(&self) -> &Arc<SocketRegistry> {
        &self.registry
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "socket server listening");
        self.run_on(listener).await
    }

    /// Serves on an already-bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> ServerResult<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let config = self.config.clone();
                            let store = Arc::clone(&self.store);
                            let mutations = Arc::clone(&self.mutations);
                            let bus = Arc::clone(&self.bus);
                            let registry = Arc::clone(&self.registry);
                            let shutdown = self.shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream, peer_addr, config, store, mutations, bus, registry,
                                    shutdown,
                                )
                                .await
                                {
                                    debug!(peer = %peer_addr, error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        Ok(())
    }

    /// Signals every connection task and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    store: Arc<ServerStore>,
    mutations: Arc<MutationHandler>,
    bus: Arc<EventBus>,
    registry: Arc<SocketRegistry>,
    shutdown: broadcast::Sender<()>,
) -> ServerResult<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut frames) = ws.split();

    // The first frame must be a handshake presenting an issued socket id.
    let user_id = loop {
        match frames.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Handshake { socket_id }) => match registry.claim(&socket_id) {
                    Some(user_id) => break user_id,
                    None => {
                        return Err(ServerError::HandshakeRejected(format!(
                            "unknown socket id from {peer_addr}"
                        )))
                    }
                },
                _ => {
                    return Err(ServerError::HandshakeRejected(
                        "expected a handshake frame".into(),
                    ))
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(ServerError::HandshakeRejected(
                    "closed before handshake".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };
    debug!(peer = %peer_addr, user = %user_id, "socket bound");

    let mut session = Session::new(user_id, config.batch_limit);

    // Bus events are funneled through a channel so the synchronous bus
    // never blocks on socket I/O.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let subscription = bus.subscribe(move |event| {
        let _ = event_tx.send(event.clone());
    });

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut shutdown_rx = shutdown.subscribe();

    // Errors break out of the loop rather than returning so the bus
    // subscription is always released.
    let result = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            let replies = session.handle_message(&message, &store, &mutations);
                            if let Err(e) = send_all(&mut sink, replies).await {
                                break Err(e);
                            }
                        }
                        Err(e) => warn!(peer = %peer_addr, error = %e, "discarding malformed frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ServerError::from(e)),
            },
            event = event_rx.recv() => {
                if let Some(event) = event {
                    let pushes = session.handle_event(&event, &store);
                    if let Err(e) = send_all(&mut sink, pushes).await {
                        break Err(e);
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send_all(&mut sink, vec![ServerMessage::Heartbeat]).await {
                    break Err(e);
                }
            }
            _ = shutdown_rx.recv() => break Ok(()),
        }
    };

    bus.unsubscribe(subscription);
    result
}

async fn send_all(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    messages: Vec<ServerMessage>,
) -> ServerResult<()> {
    for message in messages {
        let frame = serde_json::to_string(&message)?;
        sink.send(Message::Text(frame)).await?;
    }
    Ok(())
}
