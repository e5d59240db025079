//! Builders and the in-memory loopback harness.

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use weave_bus::EventBus;
use weave_client::{LocalStore, MemoryCursorStore, SyncClient};
use weave_model::{LwwCrdt, LwwDoc, RecordId, Revision, RootId, UserId};
use weave_protocol::{ClientMessage, RecordItem, ServerMessage};
use weave_server::{MutationHandler, ServerStore, Session};

/// Encodes a one-field LWW document.
pub fn state_bytes(field: &str, value: Value, clock: u64, actor: &str) -> Bytes {
    let mut doc = LwwDoc::new();
    doc.set(field, value, clock, actor);
    doc.encode().expect("encoding a fresh document cannot fail")
}

/// Builds a record item with the given revision and state.
pub fn record_item(id: &str, root: &str, revision: u64, state: Bytes) -> RecordItem {
    RecordItem {
        id: RecordId::new(id),
        root_id: RootId::new(root),
        record_type: "page".into(),
        attributes: Value::Null,
        state,
        revision: Revision::new(revision),
        created_at: Utc::now(),
        created_by: UserId::new("fixture"),
        updated_at: None,
        updated_by: None,
    }
}

/// A server fixture: store, bus and mutation handler wired together.
pub struct TestServer {
    /// The synchronized tables.
    pub store: Arc<ServerStore>,
    /// The server's event bus.
    pub bus: Arc<EventBus>,
    /// The mutation handler publishing on `bus`.
    pub mutations: Arc<MutationHandler>,
    batch_limit: usize,
}

impl TestServer {
    /// Creates a server fixture with the default batch limit of 20.
    pub fn new() -> Self {
        Self::with_batch_limit(20)
    }

    /// Creates a server fixture with a custom batch limit.
    pub fn with_batch_limit(batch_limit: usize) -> Self {
        let store = Arc::new(ServerStore::new(Arc::new(LwwCrdt::new())));
        let bus = Arc::new(EventBus::new());
        let mutations = Arc::new(MutationHandler::new(Arc::clone(&store), bus.clone(), 100));
        Self {
            store,
            bus,
            mutations,
            batch_limit,
        }
    }

    /// Opens a session for a user, as the socket layer would after a
    /// successful handshake.
    pub fn session(&self, user: &str) -> Session {
        Session::new(UserId::new(user), self.batch_limit)
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A client fixture bound to one device.
pub struct TestClient {
    /// The sync client facade.
    pub client: SyncClient,
    /// The client's local event bus.
    pub bus: Arc<EventBus>,
}

impl TestClient {
    /// Creates a client fixture for a user.
    pub fn new(user: &str) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(LocalStore::new(Arc::new(LwwCrdt::new()), Arc::clone(&bus)));
        let client = SyncClient::new(
            UserId::new(user),
            store,
            Arc::new(MemoryCursorStore::new()),
        );
        Self { client, bus }
    }

    /// Returns the local replica.
    pub fn store(&self) -> &Arc<LocalStore> {
        self.client.store()
    }
}

/// Pumps messages between a client and its server session until both
/// sides go quiet: outbox batches, mutation results, consume requests and
/// batch pushes all flow in-memory, exactly as they would over the
/// socket.
///
/// The outbox is delivered once per call; entries left pending by a
/// retriable status go out again on the next call, like a reconnect.
pub fn pump(client: &SyncClient, session: &mut Session, server: &TestServer) {
    let mut to_server: Vec<ClientMessage> = Vec::new();

    if let Some(mutations) = client.next_mutations() {
        to_server.push(mutations);
    }
    to_server.extend(
        client
            .resubscribe_all()
            .expect("memory cursor store cannot fail"),
    );

    // Terminates: every consume round either advances a cursor or gets no
    // reply, and mutation results produce no further requests.
    let mut rounds = 0;
    while !to_server.is_empty() {
        rounds += 1;
        assert!(rounds < 10_000, "loopback pump did not converge");

        let mut to_client: Vec<ServerMessage> = Vec::new();
        for message in to_server.drain(..) {
            to_client.extend(session.handle_message(&message, &server.store, &server.mutations));
        }

        for message in &to_client {
            to_server.extend(client.handle_server_message(message));
        }
    }
}
