//! Cross-process event relay with origin filtering.

use crate::bus::{EventBus, EventPublisher};
use crate::event::Event;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one server process in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    /// Creates a host id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random host id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An event tagged with the host that published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedEvent {
    /// The publishing host.
    pub origin: HostId,
    /// The event itself.
    pub event: Event,
}

/// Extends an [`EventBus`] across processes.
///
/// Publishing delivers locally first, then sends the serialized event with
/// an origin tag on the shared channel. The listener republishes received
/// events into the local bus, discarding those whose origin matches its
/// own host id so a fleet of servers never re-relays its own traffic.
///
/// The in-process `broadcast` channel stands in for the deployment's
/// shared fan-out transport; production wires a real one into the same
/// seam.
pub struct BroadcastBridge {
    host_id: HostId,
    bus: Arc<EventBus>,
    channel: broadcast::Sender<String>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastBridge {
    /// Creates a shared channel for a fleet of bridges.
    pub fn channel(capacity: usize) -> broadcast::Sender<String> {
        broadcast::channel(capacity).0
    }

    /// Creates a bridge over a local bus and a shared channel.
    pub fn new(host_id: HostId, bus: Arc<EventBus>, channel: broadcast::Sender<String>) -> Self {
        Self {
            host_id,
            bus,
            channel,
            listener: Mutex::new(None),
        }
    }

    /// Starts the listener task. Must run inside a tokio runtime.
    pub fn init(&self) {
        let mut rx = self.channel.subscribe();
        let bus = Arc::clone(&self.bus);
        let host_id = self.host_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => match serde_json::from_str::<RelayedEvent>(&frame) {
                        Ok(relayed) if relayed.origin == host_id => {
                            debug!(host = %host_id.as_str(), "dropping own relayed event");
                        }
                        Ok(relayed) => bus.publish(relayed.event),
                        Err(e) => warn!(error = %e, "discarding malformed relayed event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "relay listener lagged; events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *self.listener.lock() = Some(handle);
    }

    /// Stops the listener task.
    pub fn dispose(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    /// Returns this bridge's host id.
    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    /// Returns the local bus behind the bridge.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

impl EventPublisher for BroadcastBridge {
    fn publish(&self, event: Event) {
        self.bus.publish(event.clone());

        let relayed = RelayedEvent {
            origin: self.host_id.clone(),
            event,
        };
        match serde_json::to_string(&relayed) {
            // Send fails only when no receiver exists, which is fine.
            Ok(frame) => drop(self.channel.send(frame)),
            Err(e) => warn!(error = %e, "failed to serialize relayed event"),
        }
    }
}

impl Drop for BroadcastBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}
