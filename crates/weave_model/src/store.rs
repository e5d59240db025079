//! Per-record CRDT state with derived attribute snapshots.

use crate::crdt::Crdt;
use crate::error::{ModelError, ModelResult};
use crate::types::RecordId;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// The stored state of one record's document.
#[derive(Debug, Clone)]
pub struct DocState {
    /// The merged CRDT state blob.
    pub state: Bytes,
    /// Attribute snapshot decoded from `state`.
    pub attributes: Value,
    /// Set when the blob failed to decode; quarantined records are
    /// excluded from attribute-derived queries.
    pub quarantined: bool,
}

/// Holds the CRDT state and derived attributes for every record.
///
/// Both client and server hold one of these. The attribute snapshot is
/// recomputed and persisted on every state write, so queries never read
/// through the CRDT decoder on the hot path.
///
/// A corrupt blob is fatal for the affected record only: the record is
/// quarantined and the store stays usable.
pub struct StateStore {
    crdt: Arc<dyn Crdt>,
    docs: RwLock<HashMap<RecordId, DocState>>,
}

impl StateStore {
    /// Creates an empty store over the given CRDT implementation.
    pub fn new(crdt: Arc<dyn Crdt>) -> Self {
        Self {
            crdt,
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Merges an update into a record's state and refreshes its snapshot.
    ///
    /// Applying the same update twice is a no-op by CRDT idempotence. On a
    /// decode failure the merged bytes are kept but the record is
    /// quarantined and the error is returned.
    pub fn apply_update(&self, id: &RecordId, update: &[u8]) -> ModelResult<DocState> {
        let mut docs = self.docs.write();
        let previous = docs.get(id).map(|d| d.state.clone()).unwrap_or_default();

        let merged = match self.crdt.apply_update(&previous, update) {
            Ok(state) => state,
            Err(err) => {
                warn!(record = %id, error = %err, "quarantining record: update failed to merge");
                self.quarantine_locked(&mut docs, id, previous);
                return Err(err);
            }
        };

        match self.crdt.decode(&merged) {
            Ok(attributes) => {
                let doc = DocState {
                    state: merged,
                    attributes,
                    quarantined: false,
                };
                docs.insert(id.clone(), doc.clone());
                Ok(doc)
            }
            Err(err) => {
                warn!(record = %id, error = %err, "quarantining record: state failed to decode");
                self.quarantine_locked(&mut docs, id, merged);
                Err(err)
            }
        }
    }

    fn quarantine_locked(
        &self,
        docs: &mut HashMap<RecordId, DocState>,
        id: &RecordId,
        state: Bytes,
    ) {
        docs.insert(
            id.clone(),
            DocState {
                state,
                attributes: Value::Null,
                quarantined: true,
            },
        );
    }

    /// Computes the minimal update carrying `new_state` beyond the stored
    /// state, for outbox delivery.
    pub fn diff_against(&self, id: &RecordId, new_state: &[u8]) -> ModelResult<Bytes> {
        let previous = {
            let docs = self.docs.read();
            docs.get(id).map(|d| d.state.clone()).unwrap_or_default()
        };
        self.crdt.diff(&previous, new_state)
    }

    /// Returns the attribute snapshot, or `None` if the record is absent
    /// or quarantined.
    pub fn attributes(&self, id: &RecordId) -> Option<Value> {
        let docs = self.docs.read();
        docs.get(id)
            .filter(|d| !d.quarantined)
            .map(|d| d.attributes.clone())
    }

    /// Returns the raw state blob, quarantined or not.
    pub fn state(&self, id: &RecordId) -> Option<Bytes> {
        self.docs.read().get(id).map(|d| d.state.clone())
    }

    /// Returns true if the record is quarantined.
    pub fn is_quarantined(&self, id: &RecordId) -> bool {
        self.docs
            .read()
            .get(id)
            .map(|d| d.quarantined)
            .unwrap_or(false)
    }

    /// Removes a record's document entirely.
    pub fn remove(&self, id: &RecordId) {
        self.docs.write().remove(id);
    }

    /// Returns the number of records held.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Returns the underlying CRDT implementation.
    pub fn crdt(&self) -> &Arc<dyn Crdt> {
        &self.crdt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{LwwCrdt, LwwDoc};
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::new(Arc::new(LwwCrdt::new()))
    }

    fn update(field: &str, value: Value, clock: u64) -> Bytes {
        let mut doc = LwwDoc::new();
        doc.set(field, value, clock, "test");
        doc.encode().unwrap()
    }

    #[test]
    fn apply_refreshes_snapshot() {
        let store = store();
        let id = RecordId::new("rec-1");

        store.apply_update(&id, &update("title", json!("v1"), 1)).unwrap();
        assert_eq!(store.attributes(&id), Some(json!({ "title": "v1" })));

        store.apply_update(&id, &update("title", json!("v2"), 2)).unwrap();
        assert_eq!(store.attributes(&id), Some(json!({ "title": "v2" })));
    }

    #[test]
    fn duplicate_update_is_idempotent() {
        let store = store();
        let id = RecordId::new("rec-1");
        let up = update("title", json!("once"), 1);

        let first = store.apply_update(&id, &up).unwrap();
        let second = store.apply_update(&id, &up).unwrap();

        assert_eq!(first.state, second.state);
        assert_eq!(first.attributes, second.attributes);
    }

    #[test]
    fn corrupt_update_quarantines_only_that_record() {
        let store = store();
        let good = RecordId::new("good");
        let bad = RecordId::new("bad");

        store.apply_update(&good, &update("title", json!("ok"), 1)).unwrap();

        let err = store.apply_update(&bad, &[0xFF, 0x00, 0x13, 0x37]);
        assert!(err.is_err());
        assert!(store.is_quarantined(&bad));
        assert_eq!(store.attributes(&bad), None);

        // The good record is untouched and the store keeps working.
        assert_eq!(store.attributes(&good), Some(json!({ "title": "ok" })));
        store.apply_update(&good, &update("title", json!("still ok"), 2)).unwrap();
    }

    #[test]
    fn diff_against_stored_state() {
        let store = store();
        let id = RecordId::new("rec-1");

        store.apply_update(&id, &update("title", json!("v1"), 1)).unwrap();

        let mut new_doc = LwwDoc::new();
        new_doc.set("title", json!("v1"), 1, "test");
        new_doc.set("body", json!("added"), 2, "test");

        let delta = store.diff_against(&id, &new_doc.encode().unwrap()).unwrap();
        let delta_doc = LwwDoc::decode(&delta).unwrap();
        assert_eq!(delta_doc.snapshot(), json!({ "body": "added" }));
    }

    #[test]
    fn remove_clears_document() {
        let store = store();
        let id = RecordId::new("rec-1");

        store.apply_update(&id, &update("title", json!("x"), 1)).unwrap();
        assert_eq!(store.len(), 1);

        store.remove(&id);
        assert!(store.is_empty());
        assert_eq!(store.attributes(&id), None);
    }
}
