//! Persisted consumer cursors.

use crate::error::ClientResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use weave_model::{Dataset, Revision, RootId};

/// Persistent storage of consumer cursors, keyed `(dataset, root)`.
///
/// A cursor moves only forward; the single exception is
/// [`CursorStore::clear`], which requests a full resync for one
/// subscription.
pub trait CursorStore: Send + Sync {
    /// Returns the cursor, `Revision::ZERO` when none has been persisted.
    fn get(&self, dataset: Dataset, root_id: &RootId) -> ClientResult<Revision>;

    /// Persists the cursor. Values at or below the stored one are ignored.
    fn set(&self, dataset: Dataset, root_id: &RootId, cursor: Revision) -> ClientResult<()>;

    /// Drops the cursor, so the next consume requests a full resync.
    fn clear(&self, dataset: Dataset, root_id: &RootId) -> ClientResult<()>;
}

/// In-memory cursor store.
#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<(Dataset, RootId), Revision>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, dataset: Dataset, root_id: &RootId) -> ClientResult<Revision> {
        Ok(self
            .cursors
            .read()
            .get(&(dataset, root_id.clone()))
            .copied()
            .unwrap_or(Revision::ZERO))
    }

    fn set(&self, dataset: Dataset, root_id: &RootId, cursor: Revision) -> ClientResult<()> {
        let mut cursors = self.cursors.write();
        let entry = cursors.entry((dataset, root_id.clone())).or_insert(Revision::ZERO);
        if cursor > *entry {
            *entry = cursor;
        }
        Ok(())
    }

    fn clear(&self, dataset: Dataset, root_id: &RootId) -> ClientResult<()> {
        self.cursors.write().remove(&(dataset, root_id.clone()));
        Ok(())
    }
}
