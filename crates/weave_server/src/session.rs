//! Per-connection message and event routing.

use crate::mutations::MutationHandler;
use crate::store::ServerStore;
use crate::synchronizer::Synchronizer;
use std::collections::HashMap;
use tracing::{debug, warn};
use weave_bus::Event;
use weave_model::{Dataset, RootId, UserId};
use weave_protocol::{ClientMessage, ServerMessage};

/// One authenticated connection's server-side state.
///
/// Owns the synchronizer per `(dataset, root)` subscription and routes
/// both client messages and bus events to them. Transport-free: the socket
/// layer feeds it frames and writes out whatever it returns.
pub struct Session {
    user_id: UserId,
    synchronizers: HashMap<(Dataset, RootId), Synchronizer>,
    batch_limit: usize,
}

impl Session {
    /// Creates a session for an authenticated user.
    pub fn new(user_id: UserId, batch_limit: usize) -> Self {
        Self {
            user_id,
            synchronizers: HashMap::new(),
            batch_limit,
        }
    }

    /// Returns the session's user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.synchronizers.len()
    }

    /// Handles one client frame, returning the frames to send back.
    pub fn handle_message(
        &mut self,
        message: &ClientMessage,
        store: &ServerStore,
        mutations: &MutationHandler,
    ) -> Vec<ServerMessage> {
        if let Some((dataset, user_id, root_id, cursor)) = message.consume_parts() {
            if user_id != &self.user_id {
                warn!(claimed = %user_id, actual = %self.user_id, "consume for another user; ignoring");
                return Vec::new();
            }
            if !self.may_subscribe(dataset, root_id, store) {
                debug!(%dataset, root = %root_id, user = %self.user_id, "subscription denied");
                return Vec::new();
            }

            let synchronizer = self
                .synchronizers
                .entry((dataset, root_id.clone()))
                .or_insert_with(|| {
                    Synchronizer::new(
                        dataset,
                        self.user_id.clone(),
                        root_id.clone(),
                        self.batch_limit,
                    )
                });
            synchronizer.consume(cursor);
            return synchronizer.fetch(store).into_iter().collect();
        }

        match message {
            ClientMessage::Mutations { mutations: batch } => {
                let results = mutations.handle_batch(&self.user_id, batch);
                vec![ServerMessage::MutationResults { results }]
            }
            ClientMessage::Heartbeat => vec![ServerMessage::Heartbeat],
            ClientMessage::Handshake { .. } => {
                warn!(user = %self.user_id, "handshake on an already-bound socket; ignoring");
                Vec::new()
            }
            // Consume variants were handled above.
            _ => Vec::new(),
        }
    }

    /// Handles one bus event, returning any proactive batch pushes.
    pub fn handle_event(&mut self, event: &Event, store: &ServerStore) -> Vec<ServerMessage> {
        self.synchronizers
            .values_mut()
            .filter_map(|synchronizer| synchronizer.on_event(event, store))
            .collect()
    }

    /// A subscription requires a live collaboration on the root, except
    /// for the collaborations dataset, where a revoked row must still
    /// reach the client so it can run its local cascade.
    fn may_subscribe(&self, dataset: Dataset, root_id: &RootId, store: &ServerStore) -> bool {
        match dataset {
            Dataset::Collaborations => store.collaboration(root_id, &self.user_id).is_some(),
            _ => store.role_for(root_id, &self.user_id).is_some(),
        }
    }
}
