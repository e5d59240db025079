//! The client facade: local-first writes, outbox delivery, consumer
//! routing.

use crate::consumer::Consumer;
use crate::cursors::CursorStore;
use crate::error::{ClientError, ClientResult};
use crate::outbox::MutationOutbox;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use weave_model::{Dataset, RecordId, Role, RootId, UserId};
use weave_protocol::{ClientMessage, Mutation, MutationKind, ServerMessage};

/// One device's sync client.
///
/// Every local write is applied to the replica immediately and queued in
/// the outbox; batches from the server route to the matching consumer.
/// The socket layer feeds [`SyncClient::handle_server_message`] and sends
/// whatever it and [`SyncClient::next_mutations`] return.
pub struct SyncClient {
    user_id: UserId,
    store: Arc<LocalStore>,
    cursors: Arc<dyn CursorStore>,
    outbox: Mutex<MutationOutbox>,
    consumers: Mutex<HashMap<(Dataset, RootId), Consumer>>,
    mutation_batch: usize,
}

impl SyncClient {
    /// Creates a client over a replica and cursor store.
    pub fn new(user_id: UserId, store: Arc<LocalStore>, cursors: Arc<dyn CursorStore>) -> Self {
        Self {
            user_id,
            store,
            cursors,
            outbox: Mutex::new(MutationOutbox::new()),
            consumers: Mutex::new(HashMap::new()),
            mutation_batch: 100,
        }
    }

    /// Sets the outbox batch size.
    pub fn with_mutation_batch(mut self, size: usize) -> Self {
        self.mutation_batch = size;
        self
    }

    /// Returns the local replica.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns this client's user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the number of mutations awaiting acknowledgement.
    pub fn pending_mutations(&self) -> usize {
        self.outbox.lock().pending_count()
    }

    // --- subscriptions ---

    /// Subscribes to every dataset of a root, returning the initial
    /// consume requests.
    pub fn subscribe_root(&self, root_id: &RootId) -> ClientResult<Vec<ClientMessage>> {
        let mut consumers = self.consumers.lock();
        let mut requests = Vec::new();

        for dataset in Dataset::ALL {
            let consumer = consumers
                .entry((dataset, root_id.clone()))
                .or_insert_with(|| {
                    Consumer::new(dataset, self.user_id.clone(), root_id.clone())
                });
            requests.push(consumer.init(&*self.cursors)?);
        }
        Ok(requests)
    }

    /// Re-issues consume requests for every subscription, used after a
    /// reconnect.
    pub fn resubscribe_all(&self) -> ClientResult<Vec<ClientMessage>> {
        let mut consumers = self.consumers.lock();
        consumers
            .values_mut()
            .map(|consumer| consumer.init(&*self.cursors))
            .collect()
    }

    // --- inbound routing ---

    /// Routes one server frame, returning follow-up requests to send.
    pub fn handle_server_message(&self, message: &ServerMessage) -> Vec<ClientMessage> {
        if let (Some(dataset), Some(root_id)) = (message.dataset(), message.root_id()) {
            let mut consumers = self.consumers.lock();
            let Some(consumer) = consumers.get_mut(&(dataset, root_id.clone())) else {
                warn!(%dataset, root = %root_id, "batch for unknown subscription; dropping");
                return Vec::new();
            };
            return consumer
                .on_batch(message, &self.store, &*self.cursors)
                .into_iter()
                .collect();
        }

        match message {
            ServerMessage::MutationResults { results } => {
                let mut outbox = self.outbox.lock();
                outbox.acknowledge(results);
                outbox.compact();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Returns the next outbox batch as a `mutations` frame, if any.
    pub fn next_mutations(&self) -> Option<ClientMessage> {
        let batch = self.outbox.lock().pending_batch(self.mutation_batch);
        if batch.is_empty() {
            None
        } else {
            Some(ClientMessage::Mutations { mutations: batch })
        }
    }

    // --- local-first writes ---

    /// Creates a record locally and queues the mutation.
    ///
    /// Creating a record whose id equals the root id creates the root
    /// itself.
    pub fn create_record(
        &self,
        id: &RecordId,
        root_id: &RootId,
        record_type: &str,
        initial_state: &[u8],
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        self.store
            .stage_record(id, root_id, record_type, initial_state, &self.user_id, at)?;

        self.outbox.lock().enqueue(Mutation::new(MutationKind::CreateRecord {
            id: id.clone(),
            root_id: root_id.clone(),
            record_type: record_type.to_string(),
            // A full state blob is its own update.
            update: bytes::Bytes::copy_from_slice(initial_state),
            created_at: at,
        }));
        Ok(())
    }

    /// Edits a record: diffs the new state against the replica, applies
    /// the delta locally, and queues it. A no-op edit queues nothing.
    pub fn update_record(
        &self,
        id: &RecordId,
        new_state: &[u8],
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        let record = self
            .store
            .record(id)
            .ok_or_else(|| ClientError::UnknownRecord {
                id: id.as_str().to_string(),
            })?;

        let update = self.store.diff_for_update(id, new_state)?;

        // An empty delta decodes to an empty snapshot: nothing to ship.
        let snapshot = self.store.decode_update(&update)?;
        if snapshot.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            return Ok(());
        }

        self.store.stage_record(
            id,
            &record.root_id,
            &record.record_type,
            &update,
            &self.user_id,
            at,
        )?;

        self.outbox.lock().enqueue(Mutation::new(MutationKind::UpdateRecord {
            id: id.clone(),
            root_id: record.root_id,
            update,
            updated_at: at,
        }));
        Ok(())
    }

    /// Deletes a record locally and queues the mutation.
    pub fn delete_record(&self, id: &RecordId, at: DateTime<Utc>) -> ClientResult<()> {
        let root_id = self.store.remove_record_local(id)?;

        self.outbox.lock().enqueue(Mutation::new(MutationKind::DeleteRecord {
            id: id.clone(),
            root_id,
            deleted_at: at,
        }));
        Ok(())
    }

    /// Marks a record as seen and/or opened.
    pub fn record_interaction(
        &self,
        record_id: &RecordId,
        seen_at: Option<DateTime<Utc>>,
        opened_at: Option<DateTime<Utc>>,
    ) -> ClientResult<()> {
        let record = self
            .store
            .record(record_id)
            .ok_or_else(|| ClientError::UnknownRecord {
                id: record_id.as_str().to_string(),
            })?;

        self.store
            .stage_interaction(&record.root_id, record_id, &self.user_id, seen_at, opened_at);

        self.outbox.lock().enqueue(Mutation::new(MutationKind::UpsertInteraction {
            record_id: record_id.clone(),
            root_id: record.root_id,
            seen_at,
            opened_at,
        }));
        Ok(())
    }

    /// Adds a reaction.
    pub fn add_reaction(
        &self,
        record_id: &RecordId,
        reaction: &str,
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        let record = self
            .store
            .record(record_id)
            .ok_or_else(|| ClientError::UnknownRecord {
                id: record_id.as_str().to_string(),
            })?;

        self.store
            .stage_reaction(&record.root_id, record_id, &self.user_id, reaction, at, None);

        self.outbox.lock().enqueue(Mutation::new(MutationKind::UpsertReaction {
            record_id: record_id.clone(),
            root_id: record.root_id,
            reaction: reaction.to_string(),
            created_at: at,
        }));
        Ok(())
    }

    /// Retracts a reaction.
    pub fn remove_reaction(
        &self,
        record_id: &RecordId,
        reaction: &str,
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        let record = self
            .store
            .record(record_id)
            .ok_or_else(|| ClientError::UnknownRecord {
                id: record_id.as_str().to_string(),
            })?;

        self.store.stage_reaction(
            &record.root_id,
            record_id,
            &self.user_id,
            reaction,
            at,
            Some(at),
        );

        self.outbox.lock().enqueue(Mutation::new(MutationKind::DeleteReaction {
            record_id: record_id.clone(),
            root_id: record.root_id,
            reaction: reaction.to_string(),
            deleted_at: at,
        }));
        Ok(())
    }

    /// Grants a collaborator a role. Applied on sync round-trip, not
    /// optimistically: the revision that orders collaboration rows is
    /// server-assigned.
    pub fn grant_collaboration(
        &self,
        root_id: &RootId,
        collaborator_id: &UserId,
        role: Role,
    ) -> ClientResult<()> {
        self.outbox.lock().enqueue(Mutation::new(MutationKind::UpsertCollaboration {
            root_id: root_id.clone(),
            collaborator_id: collaborator_id.clone(),
            role,
        }));
        Ok(())
    }

    /// Revokes a collaborator's access.
    pub fn revoke_collaboration(
        &self,
        root_id: &RootId,
        collaborator_id: &UserId,
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        self.outbox.lock().enqueue(Mutation::new(MutationKind::DeleteCollaboration {
            root_id: root_id.clone(),
            collaborator_id: collaborator_id.clone(),
            deleted_at: at,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursors::MemoryCursorStore;
    use serde_json::json;
    use weave_bus::EventBus;
    use weave_model::{LwwCrdt, LwwDoc};
    use weave_protocol::{MutationResult, MutationStatus};

    fn client() -> SyncClient {
        let store = Arc::new(LocalStore::new(
            Arc::new(LwwCrdt::new()),
            Arc::new(EventBus::new()),
        ));
        SyncClient::new(UserId::new("u1"), store, Arc::new(MemoryCursorStore::new()))
    }

    fn state_bytes(field: &str, value: serde_json::Value, clock: u64) -> Vec<u8> {
        let mut doc = LwwDoc::new();
        doc.set(field, value, clock, "u1");
        doc.encode().unwrap().to_vec()
    }

    #[test]
    fn create_applies_locally_and_queues() {
        let client = client();
        let id = RecordId::new("root-1");

        client
            .create_record(
                &id,
                &RootId::new("root-1"),
                "space",
                &state_bytes("title", json!("home"), 1),
                Utc::now(),
            )
            .unwrap();

        // Visible immediately, before any server round-trip.
        assert_eq!(
            client.store().attributes(&id).unwrap(),
            json!({ "title": "home" })
        );
        assert_eq!(client.pending_mutations(), 1);
    }

    #[test]
    fn update_ships_the_minimal_delta() {
        let client = client();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");

        client
            .create_record(&id, &root, "page", &state_bytes("title", json!("v1"), 1), Utc::now())
            .unwrap();

        // New state extends the old one with one field.
        let mut doc = LwwDoc::new();
        doc.set("title", json!("v1"), 1, "u1");
        doc.set("body", json!("text"), 2, "u1");
        client
            .update_record(&id, &doc.encode().unwrap(), Utc::now())
            .unwrap();

        assert_eq!(client.pending_mutations(), 2);
        let batch = client.next_mutations().unwrap();
        let ClientMessage::Mutations { mutations } = batch else {
            panic!("expected mutations frame");
        };
        let MutationKind::UpdateRecord { update, .. } = &mutations[1].kind else {
            panic!("expected update_record");
        };
        // The delta carries only the new field.
        let delta = LwwDoc::decode(update).unwrap();
        assert_eq!(delta.snapshot(), json!({ "body": "text" }));
    }

    #[test]
    fn noop_update_queues_nothing() {
        let client = client();
        let id = RecordId::new("rec-1");
        let state = state_bytes("title", json!("same"), 1);

        client
            .create_record(&id, &RootId::new("root-1"), "page", &state, Utc::now())
            .unwrap();
        client.update_record(&id, &state, Utc::now()).unwrap();

        assert_eq!(client.pending_mutations(), 1);
    }

    #[test]
    fn delete_removes_locally_and_queues() {
        let client = client();
        let id = RecordId::new("rec-1");

        client
            .create_record(
                &id,
                &RootId::new("root-1"),
                "page",
                &state_bytes("title", json!("x"), 1),
                Utc::now(),
            )
            .unwrap();
        client.delete_record(&id, Utc::now()).unwrap();

        assert!(client.store().record(&id).is_none());
        assert_eq!(client.pending_mutations(), 2);
    }

    #[test]
    fn results_acknowledge_the_outbox() {
        let client = client();
        client
            .create_record(
                &RecordId::new("root-1"),
                &RootId::new("root-1"),
                "space",
                &state_bytes("title", json!("home"), 1),
                Utc::now(),
            )
            .unwrap();

        let ClientMessage::Mutations { mutations } = client.next_mutations().unwrap() else {
            panic!("expected mutations frame");
        };

        let replies = client.handle_server_message(&ServerMessage::MutationResults {
            results: vec![MutationResult {
                id: mutations[0].id.clone(),
                status: MutationStatus::Ok,
            }],
        });
        assert!(replies.is_empty());
        assert_eq!(client.pending_mutations(), 0);
        assert!(client.next_mutations().is_none());
    }

    #[test]
    fn subscribe_root_covers_every_dataset() {
        let client = client();
        let requests = client.subscribe_root(&RootId::new("root-1")).unwrap();

        assert_eq!(requests.len(), Dataset::ALL.len());
        for request in &requests {
            let (_, user_id, root_id, cursor) = request.consume_parts().unwrap();
            assert_eq!(user_id, &UserId::new("u1"));
            assert_eq!(root_id, &RootId::new("root-1"));
            assert!(cursor.is_zero());
        }
    }

    #[test]
    fn unknown_batch_is_dropped() {
        let client = client();
        let replies = client.handle_server_message(&ServerMessage::RecordsBatch {
            user_id: UserId::new("u1"),
            root_id: RootId::new("never-subscribed"),
            items: vec![],
        });
        assert!(replies.is_empty());
    }
}
