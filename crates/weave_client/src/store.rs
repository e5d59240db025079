//! The client's local replica.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use weave_bus::{Event, EventBus, EventPublisher};
use weave_model::{
    Collaboration, Crdt, Interaction, Reaction, Record, RecordId, Revision, Role, RootId,
    StateStore, Tombstone, UserId,
};
use weave_protocol::{
    CollaborationItem, InteractionItem, ReactionItem, RecordItem, TombstoneItem,
};

#[derive(Default)]
struct LocalTables {
    records: HashMap<RecordId, Record>,
    collaborations: HashMap<(RootId, UserId), Collaboration>,
    tombstones: HashMap<RecordId, Tombstone>,
    interactions: HashMap<(RecordId, UserId), Interaction>,
    reactions: HashMap<(RecordId, UserId, String), Reaction>,
}

/// Local storage for one device's replica.
///
/// Incoming batch items merge through the CRDT state store (idempotent,
/// so redelivery is harmless) and update the row tables; every applied
/// change publishes an event on the local bus, which is what invalidates
/// live queries. Local optimistic writes go through the same paths.
pub struct LocalStore {
    state: StateStore,
    tables: RwLock<LocalTables>,
    events: Arc<EventBus>,
}

impl LocalStore {
    /// Creates an empty replica over the given CRDT implementation.
    pub fn new(crdt: Arc<dyn Crdt>, events: Arc<EventBus>) -> Self {
        Self {
            state: StateStore::new(crdt),
            tables: RwLock::new(LocalTables::default()),
            events,
        }
    }

    /// Returns the local event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // --- remote batch application ---

    /// Applies one record item: CRDT merge, snapshot refresh, row upsert.
    ///
    /// A record already tombstoned locally is skipped; the deletion wins
    /// over any stale record delivery. A corrupt state blob quarantines
    /// the record and surfaces the error; the caller logs it and moves on.
    pub fn apply_record(&self, item: &RecordItem) -> ClientResult<()> {
        {
            let tables = self.tables.read();
            if tables.tombstones.contains_key(&item.id) {
                debug!(record = %item.id, "skipping record behind its tombstone");
                return Ok(());
            }
        }

        let doc = self.state.apply_update(&item.id, &item.state)?;

        let mut tables = self.tables.write();
        let created = !tables.records.contains_key(&item.id);
        let revision = tables
            .records
            .get(&item.id)
            .map(|r| r.revision.max(item.revision))
            .unwrap_or(item.revision);

        tables.records.insert(
            item.id.clone(),
            Record {
                id: item.id.clone(),
                root_id: item.root_id.clone(),
                record_type: item.record_type.clone(),
                // Attributes are re-derived locally; the wire snapshot is
                // informational only.
                attributes: doc.attributes,
                state: doc.state,
                revision,
                created_at: item.created_at,
                created_by: item.created_by.clone(),
                updated_at: item.updated_at,
                updated_by: item.updated_by.clone(),
            },
        );
        drop(tables);

        let event = if created {
            Event::RecordCreated {
                root_id: item.root_id.clone(),
                record_id: item.id.clone(),
                revision,
            }
        } else {
            Event::RecordUpdated {
                root_id: item.root_id.clone(),
                record_id: item.id.clone(),
                revision,
            }
        };
        self.events.publish(event);
        Ok(())
    }

    /// Applies one collaboration item, last-writer-wins by revision.
    ///
    /// A delivered revocation cascades: every record of the root and the
    /// interaction/reaction side tables are purged locally.
    pub fn apply_collaboration(&self, item: &CollaborationItem) -> ClientResult<bool> {
        let key = (item.root_id.clone(), item.collaborator_id.clone());

        {
            let tables = self.tables.read();
            if let Some(existing) = tables.collaborations.get(&key) {
                if !existing.accepts(item.revision) {
                    debug!(
                        root = %item.root_id,
                        collaborator = %item.collaborator_id,
                        incoming = %item.revision,
                        stored = %existing.revision,
                        "stale collaboration ignored"
                    );
                    return Ok(false);
                }
            }
        }

        let collaboration = item.clone().into_collaboration();
        let revoked = collaboration.is_deleted();

        let mut tables = self.tables.write();
        tables.collaborations.insert(key, collaboration);
        if revoked {
            purge_root(&mut tables, &self.state, &item.root_id);
        }
        drop(tables);

        self.events.publish(Event::CollaborationChanged {
            root_id: item.root_id.clone(),
            collaborator_id: item.collaborator_id.clone(),
            revision: item.revision,
        });
        Ok(true)
    }

    /// Applies one tombstone item: removes the record and its side rows.
    pub fn apply_tombstone(&self, item: &TombstoneItem) -> ClientResult<()> {
        let mut tables = self.tables.write();

        if let Some(record) = tables.records.remove(&item.id) {
            debug_assert_eq!(record.root_id, item.root_id);
        }
        self.state.remove(&item.id);
        tables
            .interactions
            .retain(|(record_id, _), _| record_id != &item.id);
        tables
            .reactions
            .retain(|(record_id, _, _), _| record_id != &item.id);
        tables
            .tombstones
            .insert(item.id.clone(), item.clone().into_tombstone());
        drop(tables);

        self.events.publish(Event::RecordDeleted {
            root_id: item.root_id.clone(),
            record_id: item.id.clone(),
            revision: item.revision,
        });
        Ok(())
    }

    /// Applies one interaction item, merging field-wise.
    pub fn apply_interaction(&self, item: &InteractionItem) -> ClientResult<()> {
        let key = (item.record_id.clone(), item.user_id.clone());
        let incoming = item.clone().into_interaction();

        let mut tables = self.tables.write();
        match tables.interactions.get_mut(&key) {
            Some(existing) => existing.merge_from(&incoming),
            None => {
                tables.interactions.insert(key, incoming);
            }
        }
        drop(tables);

        self.events.publish(Event::InteractionChanged {
            root_id: item.root_id.clone(),
            record_id: item.record_id.clone(),
            revision: item.revision,
        });
        Ok(())
    }

    /// Applies one reaction item, last-writer-wins by revision.
    pub fn apply_reaction(&self, item: &ReactionItem) -> ClientResult<()> {
        let key = (
            item.record_id.clone(),
            item.user_id.clone(),
            item.reaction.clone(),
        );

        let mut tables = self.tables.write();
        if let Some(existing) = tables.reactions.get(&key) {
            if item.revision <= existing.revision {
                return Ok(());
            }
        }
        tables.reactions.insert(key, item.clone().into_reaction());
        drop(tables);

        self.events.publish(Event::ReactionChanged {
            root_id: item.root_id.clone(),
            record_id: item.record_id.clone(),
            revision: item.revision,
        });
        Ok(())
    }

    // --- local optimistic writes ---

    /// Applies a local edit before it reaches the server: merges the
    /// update and upserts the row with no server revision yet.
    pub fn stage_record(
        &self,
        id: &RecordId,
        root_id: &RootId,
        record_type: &str,
        update: &[u8],
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> ClientResult<()> {
        let doc = self.state.apply_update(id, update)?;

        let mut tables = self.tables.write();
        let created = !tables.records.contains_key(id);
        let existing = tables.records.get(id);
        let record = Record {
            id: id.clone(),
            root_id: root_id.clone(),
            record_type: record_type.to_string(),
            attributes: doc.attributes,
            state: doc.state,
            revision: existing.map(|r| r.revision).unwrap_or(Revision::ZERO),
            created_at: existing.map(|r| r.created_at).unwrap_or(at),
            created_by: existing
                .map(|r| r.created_by.clone())
                .unwrap_or_else(|| user_id.clone()),
            updated_at: if created { None } else { Some(at) },
            updated_by: if created { None } else { Some(user_id.clone()) },
        };
        tables.records.insert(id.clone(), record);
        drop(tables);

        let event = if created {
            Event::RecordCreated {
                root_id: root_id.clone(),
                record_id: id.clone(),
                revision: Revision::ZERO,
            }
        } else {
            Event::RecordUpdated {
                root_id: root_id.clone(),
                record_id: id.clone(),
                revision: Revision::ZERO,
            }
        };
        self.events.publish(event);
        Ok(())
    }

    /// Removes a record locally ahead of the server's tombstone.
    pub fn remove_record_local(&self, id: &RecordId) -> ClientResult<RootId> {
        let mut tables = self.tables.write();
        let record = tables
            .records
            .remove(id)
            .ok_or_else(|| ClientError::UnknownRecord {
                id: id.as_str().to_string(),
            })?;
        self.state.remove(id);
        tables.interactions.retain(|(record_id, _), _| record_id != id);
        tables.reactions.retain(|(record_id, _, _), _| record_id != id);
        let root_id = record.root_id.clone();
        drop(tables);

        self.events.publish(Event::RecordDeleted {
            root_id: root_id.clone(),
            record_id: id.clone(),
            revision: Revision::ZERO,
        });
        Ok(root_id)
    }

    /// Optimistically merges the local user's read state ahead of the
    /// server's row.
    pub fn stage_interaction(
        &self,
        root_id: &RootId,
        record_id: &RecordId,
        user_id: &UserId,
        seen_at: Option<DateTime<Utc>>,
        opened_at: Option<DateTime<Utc>>,
    ) {
        let key = (record_id.clone(), user_id.clone());
        let staged = Interaction {
            record_id: record_id.clone(),
            root_id: root_id.clone(),
            user_id: user_id.clone(),
            revision: Revision::ZERO,
            seen_at,
            opened_at,
        };

        let mut tables = self.tables.write();
        match tables.interactions.get_mut(&key) {
            Some(existing) => existing.merge_from(&staged),
            None => {
                tables.interactions.insert(key, staged);
            }
        }
        drop(tables);

        self.events.publish(Event::InteractionChanged {
            root_id: root_id.clone(),
            record_id: record_id.clone(),
            revision: Revision::ZERO,
        });
    }

    /// Optimistically adds or retracts a reaction ahead of the server's
    /// row. The row keeps its server revision so the next batch still
    /// supersedes it.
    pub fn stage_reaction(
        &self,
        root_id: &RootId,
        record_id: &RecordId,
        user_id: &UserId,
        reaction: &str,
        created_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) {
        let key = (record_id.clone(), user_id.clone(), reaction.to_string());

        let mut tables = self.tables.write();
        let revision = tables
            .reactions
            .get(&key)
            .map(|r| r.revision)
            .unwrap_or(Revision::ZERO);
        tables.reactions.insert(
            key,
            Reaction {
                record_id: record_id.clone(),
                root_id: root_id.clone(),
                user_id: user_id.clone(),
                reaction: reaction.to_string(),
                revision,
                created_at,
                deleted_at,
            },
        );
        drop(tables);

        self.events.publish(Event::ReactionChanged {
            root_id: root_id.clone(),
            record_id: record_id.clone(),
            revision,
        });
    }

    /// Computes the minimal update carrying `new_state` beyond the
    /// record's current state, for the outbox.
    pub fn diff_for_update(&self, id: &RecordId, new_state: &[u8]) -> ClientResult<Bytes> {
        Ok(self.state.diff_against(id, new_state)?)
    }

    /// Decodes an update blob's snapshot (updates share the state
    /// format).
    pub fn decode_update(&self, update: &[u8]) -> ClientResult<Value> {
        Ok(self.state.crdt().decode(update)?)
    }

    // --- queries ---

    /// Returns a record, or `None` if absent or quarantined.
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        if self.state.is_quarantined(id) {
            return None;
        }
        self.tables.read().records.get(id).cloned()
    }

    /// Returns all records of a root, quarantined ones excluded, ordered
    /// by id.
    pub fn records_in_root(&self, root_id: &RootId) -> Vec<Record> {
        let tables = self.tables.read();
        let mut records: Vec<Record> = tables
            .records
            .values()
            .filter(|r| &r.root_id == root_id && !self.state.is_quarantined(&r.id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Returns a record's attribute snapshot.
    pub fn attributes(&self, id: &RecordId) -> Option<Value> {
        self.state.attributes(id)
    }

    /// Returns true if the record is quarantined.
    pub fn is_quarantined(&self, id: &RecordId) -> bool {
        self.state.is_quarantined(id)
    }

    /// Returns a collaboration row, revoked or live.
    pub fn collaboration(&self, root_id: &RootId, user_id: &UserId) -> Option<Collaboration> {
        self.tables
            .read()
            .collaborations
            .get(&(root_id.clone(), user_id.clone()))
            .cloned()
    }

    /// Returns the user's live role on a root.
    pub fn role_for(&self, root_id: &RootId, user_id: &UserId) -> Option<Role> {
        self.collaboration(root_id, user_id)
            .filter(|c| !c.is_deleted())
            .map(|c| c.role)
    }

    /// Returns a tombstone row.
    pub fn tombstone(&self, id: &RecordId) -> Option<Tombstone> {
        self.tables.read().tombstones.get(id).cloned()
    }

    /// Returns an interaction row.
    pub fn interaction(&self, record_id: &RecordId, user_id: &UserId) -> Option<Interaction> {
        self.tables
            .read()
            .interactions
            .get(&(record_id.clone(), user_id.clone()))
            .cloned()
    }

    /// Returns a reaction row.
    pub fn reaction(
        &self,
        record_id: &RecordId,
        user_id: &UserId,
        reaction: &str,
    ) -> Option<Reaction> {
        self.tables
            .read()
            .reactions
            .get(&(record_id.clone(), user_id.clone(), reaction.to_string()))
            .cloned()
    }

    /// Returns the number of record rows.
    pub fn record_count(&self) -> usize {
        self.tables.read().records.len()
    }
}

fn purge_root(tables: &mut LocalTables, state: &StateStore, root_id: &RootId) {
    let purged: Vec<RecordId> = tables
        .records
        .values()
        .filter(|r| &r.root_id == root_id)
        .map(|r| r.id.clone())
        .collect();
    for id in &purged {
        tables.records.remove(id);
        state.remove(id);
    }
    tables.interactions.retain(|_, row| &row.root_id != root_id);
    tables.reactions.retain(|_, row| &row.root_id != root_id);
    tables.tombstones.retain(|_, row| &row.root_id != root_id);
    debug!(root = %root_id, records = purged.len(), "purged root after revocation");
}
