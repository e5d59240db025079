//! Fault injection at item boundaries.
//!
//! Models the consumer being killed mid-batch-apply: some prefix of the
//! batch was applied but the cursor was never persisted (cursors advance
//! only after the whole batch commits). On restart the consumer
//! re-requests from its last committed cursor and the server redelivers
//! the full batch; idempotent merge absorbs the overlap.

use std::sync::Arc;
use weave_bus::EventBus;
use weave_client::{Consumer, LocalStore, MemoryCursorStore};
use weave_model::{Dataset, LwwCrdt, RecordId, RootId, UserId};
use weave_protocol::{RecordItem, ServerMessage};

/// Outcome of one harness run.
pub struct CrashRun {
    /// The replica after the run.
    pub store: LocalStore,
    /// The persisted cursors after the run.
    pub cursors: MemoryCursorStore,
}

fn fresh_store() -> LocalStore {
    LocalStore::new(Arc::new(LwwCrdt::new()), Arc::new(EventBus::new()))
}

fn batch_of(root: &str, items: &[RecordItem]) -> ServerMessage {
    ServerMessage::RecordsBatch {
        user_id: UserId::new("crash-test"),
        root_id: RootId::new(root),
        items: items.to_vec(),
    }
}

/// Applies the batch in one piece, no interruption.
pub fn run_uninterrupted(root: &str, items: &[RecordItem]) -> CrashRun {
    let store = fresh_store();
    let cursors = MemoryCursorStore::new();
    let mut consumer = Consumer::new(Dataset::Records, UserId::new("crash-test"), RootId::new(root));
    consumer
        .init(&cursors)
        .expect("memory cursor store cannot fail");

    consumer.on_batch(&batch_of(root, items), &store, &cursors);

    CrashRun { store, cursors }
}

/// Kills the consumer after `kill_at` items, restarts it, and redelivers
/// the batch.
pub fn run_with_crash(root: &str, items: &[RecordItem], kill_at: usize) -> CrashRun {
    let store = fresh_store();
    let cursors = MemoryCursorStore::new();

    // The doomed consumer gets through `kill_at` items. Its cursor is
    // never persisted: that happens after the last item, which it never
    // reaches.
    for item in &items[..kill_at.min(items.len())] {
        let _ = store.apply_record(item);
    }

    // Restart: a fresh consumer restores the (unadvanced) cursor and the
    // server re-serves the same batch.
    let mut consumer = Consumer::new(Dataset::Records, UserId::new("crash-test"), RootId::new(root));
    consumer
        .init(&cursors)
        .expect("memory cursor store cannot fail");
    consumer.on_batch(&batch_of(root, items), &store, &cursors);

    CrashRun { store, cursors }
}

/// Asserts two replicas agree on every given record.
pub fn assert_converged(a: &LocalStore, b: &LocalStore, ids: &[RecordId]) {
    for id in ids {
        assert_eq!(
            a.attributes(id),
            b.attributes(id),
            "replicas diverged on record {id}"
        );
    }
}
