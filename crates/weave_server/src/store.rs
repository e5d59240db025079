//! In-memory synchronized tables.
//!
//! The relational engine proper is an external collaborator; these tables
//! keep the shapes the sync core needs (rows addressable by key and
//! scannable in revision order) behind the same operations a database
//! binding would expose. Every write reassigns the row's revision from the
//! sequencer, which also maintains the revision index used by batch
//! queries.

use crate::error::ServerResult;
use crate::sequencer::RevisionSequencer;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use weave_bus::Event;
use weave_model::{
    Collaboration, Crdt, Dataset, Interaction, Reaction, Record, RecordId, Revision, Role, RootId,
    Tombstone, UserId,
};

struct Table<K, V> {
    rows: HashMap<K, V>,
    by_revision: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V: Clone> Table<K, V> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            by_revision: BTreeMap::new(),
        }
    }

    fn upsert(&mut self, key: K, old_revision: Option<Revision>, revision: Revision, row: V) {
        if let Some(old) = old_revision {
            self.by_revision.remove(&old.value());
        }
        self.by_revision.insert(revision.value(), key.clone());
        self.rows.insert(key, row);
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    fn remove(&mut self, key: &K, revision: Revision) -> Option<V> {
        self.by_revision.remove(&revision.value());
        self.rows.remove(key)
    }

    /// Rows with revision strictly above `cursor`, ascending, filtered,
    /// capped at `limit`.
    fn after<F: Fn(&V) -> bool>(&self, cursor: Revision, limit: usize, filter: F) -> Vec<V> {
        self.by_revision
            .range((Excluded(cursor.value()), Unbounded))
            .filter_map(|(_, key)| self.rows.get(key))
            .filter(|row| filter(row))
            .take(limit)
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

struct Tables {
    records: Table<RecordId, Record>,
    collaborations: Table<(RootId, UserId), Collaboration>,
    tombstones: Table<RecordId, Tombstone>,
    interactions: Table<(RecordId, UserId), Interaction>,
    reactions: Table<(RecordId, UserId, String), Reaction>,
}

/// The server's synchronized tables.
///
/// All writes go through the sequencer under one write lock, making
/// revision assignment the single serialization point. Reads are
/// revision-ordered range scans, the same shape as
/// `SELECT ... WHERE root_id = ? AND revision > ? ORDER BY revision ASC
/// LIMIT ?`.
pub struct ServerStore {
    crdt: Arc<dyn Crdt>,
    sequencer: Arc<RevisionSequencer>,
    tables: RwLock<Tables>,
}

impl ServerStore {
    /// Creates an empty store over the given CRDT implementation.
    pub fn new(crdt: Arc<dyn Crdt>) -> Self {
        Self {
            crdt,
            sequencer: Arc::new(RevisionSequencer::new()),
            tables: RwLock::new(Tables {
                records: Table::new(),
                collaborations: Table::new(),
                tombstones: Table::new(),
                interactions: Table::new(),
                reactions: Table::new(),
            }),
        }
    }

    /// Returns the sequencer.
    pub fn sequencer(&self) -> &Arc<RevisionSequencer> {
        &self.sequencer
    }

    // --- record writes ---

    /// Creates a record from an initial CRDT update.
    ///
    /// Redelivered creates merge into the existing row, so duplicate
    /// delivery converges instead of erroring.
    pub fn create_record(
        &self,
        id: &RecordId,
        root_id: &RootId,
        record_type: &str,
        update: &[u8],
        created_by: &UserId,
        created_at: DateTime<Utc>,
    ) -> ServerResult<(Record, Event)> {
        let mut tables = self.tables.write();

        if tables.records.get(id).is_some() {
            if let Some(merged) = self.merge_record_locked(&mut tables, id, update, created_by, created_at)? {
                return Ok(merged);
            }
        }

        let state = self.crdt.apply_update(&[], update)?;
        let attributes = self.crdt.decode(&state)?;
        let revision = self.sequencer.next(Dataset::Records);

        let record = Record {
            id: id.clone(),
            root_id: root_id.clone(),
            record_type: record_type.to_string(),
            attributes,
            state,
            revision,
            created_at,
            created_by: created_by.clone(),
            updated_at: None,
            updated_by: None,
        };
        tables.records.upsert(id.clone(), None, revision, record.clone());

        let event = Event::RecordCreated {
            root_id: root_id.clone(),
            record_id: id.clone(),
            revision,
        };
        Ok((record, event))
    }

    /// Merges a CRDT update into an existing record.
    ///
    /// Returns `None` when the record no longer exists (already deleted);
    /// the tombstone supersedes the edit.
    pub fn update_record(
        &self,
        id: &RecordId,
        update: &[u8],
        updated_by: &UserId,
        updated_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Record, Event)>> {
        self.merge_record(id, update, updated_by, updated_at)
    }

    fn merge_record(
        &self,
        id: &RecordId,
        update: &[u8],
        updated_by: &UserId,
        updated_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Record, Event)>> {
        let mut tables = self.tables.write();
        self.merge_record_locked(&mut tables, id, update, updated_by, updated_at)
    }

    fn merge_record_locked(
        &self,
        tables: &mut Tables,
        id: &RecordId,
        update: &[u8],
        updated_by: &UserId,
        updated_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Record, Event)>> {
        let Some(existing) = tables.records.get(id).cloned() else {
            return Ok(None);
        };

        let state = self.crdt.apply_update(&existing.state, update)?;
        let attributes = self.crdt.decode(&state)?;
        let revision = self.sequencer.next(Dataset::Records);

        let record = Record {
            attributes,
            state,
            revision,
            updated_at: Some(updated_at),
            updated_by: Some(updated_by.clone()),
            ..existing.clone()
        };
        tables
            .records
            .upsert(id.clone(), Some(existing.revision), revision, record.clone());

        let event = Event::RecordUpdated {
            root_id: record.root_id.clone(),
            record_id: id.clone(),
            revision,
        };
        Ok(Some((record, event)))
    }

    /// Deletes a record: removes the row and its side-table rows, and
    /// writes a tombstone that flows to consumers through the tombstones
    /// dataset.
    pub fn delete_record(
        &self,
        id: &RecordId,
        deleted_by: &UserId,
        deleted_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Tombstone, Event)>> {
        let mut tables = self.tables.write();

        let Some(record) = tables.records.get(id).cloned() else {
            // Redelivered delete; the tombstone already exists.
            return Ok(None);
        };

        tables.records.remove(id, record.revision);
        remove_side_rows(&mut tables, id);

        let revision = self.sequencer.next(Dataset::Tombstones);
        let tombstone = Tombstone {
            id: id.clone(),
            root_id: record.root_id.clone(),
            revision,
            deleted_at,
            deleted_by: deleted_by.clone(),
        };
        tables
            .tombstones
            .upsert(id.clone(), None, revision, tombstone.clone());

        let event = Event::RecordDeleted {
            root_id: record.root_id,
            record_id: id.clone(),
            revision,
        };
        Ok(Some((tombstone, event)))
    }

    // --- collaboration writes ---

    /// Grants or changes a collaborator's role.
    pub fn upsert_collaboration(
        &self,
        root_id: &RootId,
        collaborator_id: &UserId,
        role: Role,
    ) -> ServerResult<(Collaboration, Event)> {
        let mut tables = self.tables.write();

        let key = (root_id.clone(), collaborator_id.clone());
        let old_revision = tables.collaborations.get(&key).map(|c| c.revision);
        let revision = self.sequencer.next(Dataset::Collaborations);

        let collaboration = Collaboration {
            root_id: root_id.clone(),
            collaborator_id: collaborator_id.clone(),
            role,
            revision,
            deleted_at: None,
        };
        tables
            .collaborations
            .upsert(key, old_revision, revision, collaboration.clone());

        let event = Event::CollaborationChanged {
            root_id: root_id.clone(),
            collaborator_id: collaborator_id.clone(),
            revision,
        };
        Ok((collaboration, event))
    }

    /// Revokes a collaborator's access. The row is tombstoned, not
    /// removed, so offline consumers still observe the revocation.
    pub fn delete_collaboration(
        &self,
        root_id: &RootId,
        collaborator_id: &UserId,
        deleted_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Collaboration, Event)>> {
        let mut tables = self.tables.write();

        let key = (root_id.clone(), collaborator_id.clone());
        let Some(existing) = tables.collaborations.get(&key).cloned() else {
            return Ok(None);
        };
        if existing.is_deleted() {
            return Ok(None);
        }

        let revision = self.sequencer.next(Dataset::Collaborations);
        let collaboration = Collaboration {
            revision,
            deleted_at: Some(deleted_at),
            ..existing.clone()
        };
        tables
            .collaborations
            .upsert(key, Some(existing.revision), revision, collaboration.clone());

        let event = Event::CollaborationChanged {
            root_id: root_id.clone(),
            collaborator_id: collaborator_id.clone(),
            revision,
        };
        Ok(Some((collaboration, event)))
    }

    // --- side-table writes ---

    /// Upserts the submitting user's read state for a record, merging
    /// field-wise so timestamps only move forward.
    pub fn upsert_interaction(
        &self,
        root_id: &RootId,
        record_id: &RecordId,
        user_id: &UserId,
        seen_at: Option<DateTime<Utc>>,
        opened_at: Option<DateTime<Utc>>,
    ) -> ServerResult<(Interaction, Event)> {
        let mut tables = self.tables.write();

        let key = (record_id.clone(), user_id.clone());
        let old = tables.interactions.get(&key).cloned();
        let old_revision = old.as_ref().map(|i| i.revision);
        let revision = self.sequencer.next(Dataset::Interactions);

        let mut interaction = Interaction {
            record_id: record_id.clone(),
            root_id: root_id.clone(),
            user_id: user_id.clone(),
            revision,
            seen_at,
            opened_at,
        };
        if let Some(old) = old {
            interaction.merge_from(&old);
            interaction.revision = revision;
        }
        tables
            .interactions
            .upsert(key, old_revision, revision, interaction.clone());

        let event = Event::InteractionChanged {
            root_id: root_id.clone(),
            record_id: record_id.clone(),
            revision,
        };
        Ok((interaction, event))
    }

    /// Adds (or revives) a reaction.
    pub fn upsert_reaction(
        &self,
        root_id: &RootId,
        record_id: &RecordId,
        user_id: &UserId,
        reaction: &str,
        created_at: DateTime<Utc>,
    ) -> ServerResult<(Reaction, Event)> {
        let mut tables = self.tables.write();

        let key = (record_id.clone(), user_id.clone(), reaction.to_string());
        let old_revision = tables.reactions.get(&key).map(|r| r.revision);
        let revision = self.sequencer.next(Dataset::Reactions);

        let row = Reaction {
            record_id: record_id.clone(),
            root_id: root_id.clone(),
            user_id: user_id.clone(),
            reaction: reaction.to_string(),
            revision,
            created_at,
            deleted_at: None,
        };
        tables.reactions.upsert(key, old_revision, revision, row.clone());

        let event = Event::ReactionChanged {
            root_id: root_id.clone(),
            record_id: record_id.clone(),
            revision,
        };
        Ok((row, event))
    }

    /// Retracts a reaction, keeping the tombstoned row for propagation.
    pub fn delete_reaction(
        &self,
        root_id: &RootId,
        record_id: &RecordId,
        user_id: &UserId,
        reaction: &str,
        deleted_at: DateTime<Utc>,
    ) -> ServerResult<Option<(Reaction, Event)>> {
        let mut tables = self.tables.write();

        let key = (record_id.clone(), user_id.clone(), reaction.to_string());
        let Some(existing) = tables.reactions.get(&key).cloned() else {
            return Ok(None);
        };
        if existing.is_deleted() {
            return Ok(None);
        }

        let revision = self.sequencer.next(Dataset::Reactions);
        let row = Reaction {
            revision,
            deleted_at: Some(deleted_at),
            ..existing.clone()
        };
        tables.reactions.upsert(key, Some(existing.revision), revision, row.clone());

        let event = Event::ReactionChanged {
            root_id: root_id.clone(),
            record_id: record_id.clone(),
            revision,
        };
        Ok(Some((row, event)))
    }

    // --- authorization ---

    /// Returns the user's live role on a root.
    pub fn role_for(&self, root_id: &RootId, user_id: &UserId) -> Option<Role> {
        let tables = self.tables.read();
        tables
            .collaborations
            .get(&(root_id.clone(), user_id.clone()))
            .filter(|c| !c.is_deleted())
            .map(|c| c.role)
    }

    /// Returns the user's collaboration row, live or revoked.
    pub fn collaboration(&self, root_id: &RootId, user_id: &UserId) -> Option<Collaboration> {
        let tables = self.tables.read();
        tables
            .collaborations
            .get(&(root_id.clone(), user_id.clone()))
            .cloned()
    }

    /// Returns true if the root has any collaboration rows at all.
    pub fn has_collaborations(&self, root_id: &RootId) -> bool {
        let tables = self.tables.read();
        tables
            .collaborations
            .rows
            .keys()
            .any(|(root, _)| root == root_id)
    }

    // --- batch queries ---

    /// Records of one root past a cursor, ascending by revision.
    pub fn records_after(&self, root_id: &RootId, cursor: Revision, limit: usize) -> Vec<Record> {
        self.tables
            .read()
            .records
            .after(cursor, limit, |r| &r.root_id == root_id)
    }

    /// Collaborations of one root past a cursor, revoked rows included.
    pub fn collaborations_after(
        &self,
        root_id: &RootId,
        cursor: Revision,
        limit: usize,
    ) -> Vec<Collaboration> {
        self.tables
            .read()
            .collaborations
            .after(cursor, limit, |c| &c.root_id == root_id)
    }

    /// Tombstones of one root past a cursor.
    pub fn tombstones_after(
        &self,
        root_id: &RootId,
        cursor: Revision,
        limit: usize,
    ) -> Vec<Tombstone> {
        self.tables
            .read()
            .tombstones
            .after(cursor, limit, |t| &t.root_id == root_id)
    }

    /// Interactions of one root past a cursor.
    pub fn interactions_after(
        &self,
        root_id: &RootId,
        cursor: Revision,
        limit: usize,
    ) -> Vec<Interaction> {
        self.tables
            .read()
            .interactions
            .after(cursor, limit, |i| &i.root_id == root_id)
    }

    /// Reactions of one root past a cursor, retracted rows included.
    pub fn reactions_after(
        &self,
        root_id: &RootId,
        cursor: Revision,
        limit: usize,
    ) -> Vec<Reaction> {
        self.tables
            .read()
            .reactions
            .after(cursor, limit, |r| &r.root_id == root_id)
    }

    // --- lookups ---

    /// Returns a record by id.
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.tables.read().records.get(id).cloned()
    }

    /// Returns a tombstone by record id.
    pub fn tombstone(&self, id: &RecordId) -> Option<Tombstone> {
        self.tables.read().tombstones.get(id).cloned()
    }

    /// Returns the number of record rows.
    pub fn record_count(&self) -> usize {
        self.tables.read().records.len()
    }
}

fn remove_side_rows(tables: &mut Tables, record_id: &RecordId) {
    let interaction_keys: Vec<_> = tables
        .interactions
        .rows
        .iter()
        .filter(|((rec, _), _)| rec == record_id)
        .map(|(key, row)| (key.clone(), row.revision))
        .collect();
    for (key, revision) in interaction_keys {
        tables.interactions.remove(&key, revision);
    }

    let reaction_keys: Vec<_> = tables
        .reactions
        .rows
        .iter()
        .filter(|((rec, _, _), _)| rec == record_id)
        .map(|(key, row)| (key.clone(), row.revision))
        .collect();
    for (key, revision) in reaction_keys {
        tables.reactions.remove(&key, revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use weave_model::{LwwCrdt, LwwDoc};

    fn store() -> ServerStore {
        ServerStore::new(Arc::new(LwwCrdt::new()))
    }

    fn update(field: &str, value: serde_json::Value, clock: u64) -> Bytes {
        let mut doc = LwwDoc::new();
        doc.set(field, value, clock, "test");
        doc.encode().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn create_assigns_revision_and_decodes_attributes() {
        let store = store();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");

        let (record, event) = store
            .create_record(&id, &root, "page", &update("title", json!("hi"), 1), &UserId::new("u1"), now())
            .unwrap();

        assert_eq!(record.revision, Revision::new(1));
        assert_eq!(record.attributes, json!({ "title": "hi" }));
        assert_eq!(event.dataset(), Dataset::Records);
    }

    #[test]
    fn update_reassigns_revision() {
        let store = store();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");
        let user = UserId::new("u1");

        store
            .create_record(&id, &root, "page", &update("title", json!("v1"), 1), &user, now())
            .unwrap();
        let (record, _) = store
            .update_record(&id, &update("title", json!("v2"), 2), &user, now())
            .unwrap()
            .unwrap();

        assert_eq!(record.revision, Revision::new(2));
        assert_eq!(record.attributes, json!({ "title": "v2" }));

        // The old revision no longer appears in a scan from zero.
        let batch = store.records_after(&root, Revision::ZERO, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].revision, Revision::new(2));
    }

    #[test]
    fn duplicate_create_converges() {
        let store = store();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");
        let user = UserId::new("u1");
        let up = update("title", json!("once"), 1);

        store.create_record(&id, &root, "page", &up, &user, now()).unwrap();
        let (record, _) = store.create_record(&id, &root, "page", &up, &user, now()).unwrap();

        assert_eq!(record.attributes, json!({ "title": "once" }));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn update_after_delete_is_dropped() {
        let store = store();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");
        let user = UserId::new("u1");

        store
            .create_record(&id, &root, "page", &update("title", json!("x"), 1), &user, now())
            .unwrap();
        store.delete_record(&id, &user, now()).unwrap().unwrap();

        let result = store
            .update_record(&id, &update("title", json!("late"), 2), &user, now())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn delete_writes_tombstone_and_purges_side_rows() {
        let store = store();
        let id = RecordId::new("rec-1");
        let root = RootId::new("root-1");
        let user = UserId::new("u1");

        store
            .create_record(&id, &root, "page", &update("title", json!("x"), 1), &user, now())
            .unwrap();
        store
            .upsert_interaction(&root, &id, &user, Some(now()), None)
            .unwrap();
        store
            .upsert_reaction(&root, &id, &user, "thumbs_up", now())
            .unwrap();

        let (tombstone, event) = store.delete_record(&id, &user, now()).unwrap().unwrap();
        assert_eq!(tombstone.root_id, root);
        assert_eq!(event.dataset(), Dataset::Tombstones);

        assert!(store.record(&id).is_none());
        assert!(store.interactions_after(&root, Revision::ZERO, 10).is_empty());
        assert!(store.reactions_after(&root, Revision::ZERO, 10).is_empty());
        assert_eq!(store.tombstones_after(&root, Revision::ZERO, 10).len(), 1);

        // Redelivered delete is a no-op.
        assert!(store.delete_record(&id, &user, now()).unwrap().is_none());
    }

    #[test]
    fn batch_scan_respects_cursor_order_and_limit() {
        let store = store();
        let root = RootId::new("root-1");
        let user = UserId::new("u1");

        for i in 0..5 {
            let id = RecordId::new(format!("rec-{i}"));
            store
                .create_record(&id, &root, "page", &update("n", json!(i), 1), &user, now())
                .unwrap();
        }

        let first = store.records_after(&root, Revision::ZERO, 2);
        assert_eq!(first.len(), 2);
        assert!(first[0].revision < first[1].revision);

        let rest = store.records_after(&root, first[1].revision, 10);
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn batch_scan_filters_by_root() {
        let store = store();
        let user = UserId::new("u1");

        store
            .create_record(&RecordId::new("a"), &RootId::new("root-a"), "page", &update("n", json!(1), 1), &user, now())
            .unwrap();
        store
            .create_record(&RecordId::new("b"), &RootId::new("root-b"), "page", &update("n", json!(2), 1), &user, now())
            .unwrap();

        let batch = store.records_after(&RootId::new("root-a"), Revision::ZERO, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, RecordId::new("a"));
    }

    #[test]
    fn collaboration_revocation_is_tombstoned() {
        let store = store();
        let root = RootId::new("root-1");
        let user = UserId::new("u1");

        store.upsert_collaboration(&root, &user, Role::Editor).unwrap();
        assert_eq!(store.role_for(&root, &user), Some(Role::Editor));

        let (revoked, _) = store.delete_collaboration(&root, &user, now()).unwrap().unwrap();
        assert!(revoked.is_deleted());
        assert_eq!(store.role_for(&root, &user), None);

        // The revoked row still syncs.
        let batch = store.collaborations_after(&root, Revision::ZERO, 10);
        assert_eq!(batch.len(), 1);
        assert!(batch[0].is_deleted());

        // Redelivered revocation is a no-op.
        assert!(store.delete_collaboration(&root, &user, now()).unwrap().is_none());
    }

    #[test]
    fn interaction_upsert_merges_forward() {
        let store = store();
        let root = RootId::new("root-1");
        let rec = RecordId::new("rec-1");
        let user = UserId::new("u1");

        let early = Utc::now();
        let late = early + chrono::Duration::seconds(60);

        store
            .upsert_interaction(&root, &rec, &user, Some(late), None)
            .unwrap();
        let (merged, _) = store
            .upsert_interaction(&root, &rec, &user, Some(early), Some(early))
            .unwrap();

        // seen_at keeps the later value; opened_at fills in.
        assert_eq!(merged.seen_at, Some(late));
        assert_eq!(merged.opened_at, Some(early));
    }

    #[test]
    fn reaction_retract_and_revive() {
        let store = store();
        let root = RootId::new("root-1");
        let rec = RecordId::new("rec-1");
        let user = UserId::new("u1");

        store.upsert_reaction(&root, &rec, &user, "heart", now()).unwrap();
        let (retracted, _) = store
            .delete_reaction(&root, &rec, &user, "heart", now())
            .unwrap()
            .unwrap();
        assert!(retracted.is_deleted());

        let (revived, _) = store.upsert_reaction(&root, &rec, &user, "heart", now()).unwrap();
        assert!(!revived.is_deleted());
        assert!(revived.revision > retracted.revision);
    }
}
