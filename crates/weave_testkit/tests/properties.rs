//! End-to-end properties of the sync core.

use chrono::Utc;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use weave_bus::EventBus;
use weave_client::{Consumer, CursorStore, LocalStore, MemoryCursorStore};
use weave_model::{Dataset, LwwCrdt, RecordId, Revision, Role, RootId, UserId};
use weave_protocol::{CollaborationItem, RecordItem, ServerMessage};
use weave_testkit::crash::{assert_converged, run_uninterrupted, run_with_crash};
use weave_testkit::fixtures::{pump, record_item, state_bytes, TestClient, TestServer};
use weave_testkit::generators::record_batch_strategy;

fn fresh_store() -> LocalStore {
    LocalStore::new(Arc::new(LwwCrdt::new()), Arc::new(EventBus::new()))
}

fn consumer_for(root: &str) -> Consumer {
    Consumer::new(Dataset::Records, UserId::new("test"), RootId::new(root))
}

fn records_batch(root: &str, items: Vec<RecordItem>) -> ServerMessage {
    ServerMessage::RecordsBatch {
        user_id: UserId::new("test"),
        root_id: RootId::new(root),
        items,
    }
}

fn apply_all(store: &LocalStore, cursors: &MemoryCursorStore, root: &str, items: &[RecordItem]) {
    let mut consumer = consumer_for(root);
    consumer.init(cursors).unwrap();
    consumer.on_batch(&records_batch(root, items.to_vec()), store, cursors);
}

proptest! {
    // Applying the same batch twice to a fresh replica equals applying it
    // once.
    #[test]
    fn applying_a_batch_twice_is_idempotent(
        items in record_batch_strategy("root-1", 100, 8)
    ) {
        let once = fresh_store();
        let once_cursors = MemoryCursorStore::new();
        apply_all(&once, &once_cursors, "root-1", &items);

        let twice = fresh_store();
        let twice_cursors = MemoryCursorStore::new();
        apply_all(&twice, &twice_cursors, "root-1", &items);
        // Simulate redelivery after a lost ack: same batch, cursor reset.
        twice_cursors.clear(Dataset::Records, &RootId::new("root-1")).unwrap();
        apply_all(&twice, &twice_cursors, "root-1", &items);

        let ids: Vec<RecordId> = items.iter().map(|i| i.id.clone()).collect();
        for id in &ids {
            prop_assert_eq!(once.attributes(id), twice.attributes(id));
        }
    }

    // Interleaving batches from different roots in any relative order
    // produces the same end state.
    #[test]
    fn batches_from_different_roots_commute(
        left in record_batch_strategy("root-a", 100, 6),
        right in record_batch_strategy("root-b", 200, 6),
    ) {
        let ab = fresh_store();
        let ab_cursors = MemoryCursorStore::new();
        apply_all(&ab, &ab_cursors, "root-a", &left);
        apply_all(&ab, &ab_cursors, "root-b", &right);

        let ba = fresh_store();
        let ba_cursors = MemoryCursorStore::new();
        apply_all(&ba, &ba_cursors, "root-b", &right);
        apply_all(&ba, &ba_cursors, "root-a", &left);

        for root in [RootId::new("root-a"), RootId::new("root-b")] {
            let lhs = ab.records_in_root(&root);
            let rhs = ba.records_in_root(&root);
            prop_assert_eq!(lhs.len(), rhs.len());
            for (a, b) in lhs.iter().zip(rhs.iter()) {
                prop_assert_eq!(&a.id, &b.id);
                prop_assert_eq!(&a.attributes, &b.attributes);
            }
        }
    }

    // For all sequences of applied batches the cursor is non-decreasing
    // and ends at the last applied item's revision.
    #[test]
    fn cursor_is_monotonic_across_batches(
        first in record_batch_strategy("root-1", 100, 5),
        second in record_batch_strategy("root-1", 200, 5),
    ) {
        let store = fresh_store();
        let cursors = MemoryCursorStore::new();
        let root = RootId::new("root-1");
        let mut consumer = consumer_for("root-1");
        consumer.init(&cursors).unwrap();

        let mut observed = Vec::new();
        for items in [&first, &second] {
            consumer.on_batch(&records_batch("root-1", items.clone()), &store, &cursors);
            observed.push(cursors.get(Dataset::Records, &root).unwrap());
        }

        prop_assert!(observed[0] <= observed[1]);
        prop_assert_eq!(observed[0], first.last().unwrap().revision);
        prop_assert_eq!(observed[1], second.last().unwrap().revision);
    }

    // Killing the consumer at any item boundary and redelivering yields
    // the uninterrupted run's state.
    #[test]
    fn crash_and_redelivery_never_loses_data(
        items in record_batch_strategy("root-1", 100, 6),
        kill_at in 0usize..7,
    ) {
        let kill_at = kill_at.min(items.len());
        let baseline = run_uninterrupted("root-1", &items);
        let crashed = run_with_crash("root-1", &items, kill_at);

        let ids: Vec<RecordId> = items.iter().map(|i| i.id.clone()).collect();
        assert_converged(&baseline.store, &crashed.store, &ids);
    }
}

// Two collaboration updates with revisions r1 < r2 store r2's role in
// either arrival order.
#[test]
fn collaboration_lww_is_arrival_order_independent() {
    let older = CollaborationItem {
        root_id: RootId::new("root-1"),
        collaborator_id: UserId::new("u1"),
        role: Role::Viewer,
        revision: Revision::new(40),
        deleted_at: None,
    };
    let newer = CollaborationItem {
        role: Role::Editor,
        revision: Revision::new(55),
        ..older.clone()
    };

    for order in [[&older, &newer], [&newer, &older]] {
        let store = fresh_store();
        for item in order {
            store.apply_collaboration(item).unwrap();
        }
        let stored = store
            .collaboration(&RootId::new("root-1"), &UserId::new("u1"))
            .unwrap();
        assert_eq!(stored.role, Role::Editor);
        assert_eq!(stored.revision, Revision::new(55));
    }
}

// A revocation tombstone with revision 55 arriving before a stale grant
// with revision 40 leaves the revocation in place.
#[test]
fn stale_collaboration_create_loses_to_earlier_arriving_delete() {
    let store = fresh_store();

    let deletion = CollaborationItem {
        root_id: RootId::new("root-1"),
        collaborator_id: UserId::new("u1"),
        role: Role::Editor,
        revision: Revision::new(55),
        deleted_at: Some(Utc::now()),
    };
    let stale_create = CollaborationItem {
        revision: Revision::new(40),
        deleted_at: None,
        ..deletion.clone()
    };

    assert!(store.apply_collaboration(&deletion).unwrap());
    assert!(!store.apply_collaboration(&stale_create).unwrap());

    let stored = store
        .collaboration(&RootId::new("root-1"), &UserId::new("u1"))
        .unwrap();
    assert!(stored.is_deleted());
}

// The concrete convergence scenario: revisions 101-103 on one device, a
// second device offline through all three, both converge.
#[test]
fn two_devices_converge_after_offline_catchup() {
    let server = TestServer::new();
    let alice = TestClient::new("alice");
    let bob = TestClient::new("bob");
    let mut alice_session = server.session("alice");
    let mut bob_session = server.session("bob");
    let root = RootId::new("root-1");

    // Alice creates the root and grants bob access.
    alice
        .client
        .create_record(
            &RecordId::new("root-1"),
            &root,
            "space",
            &state_bytes("title", json!("home"), 1, "alice"),
            Utc::now(),
        )
        .unwrap();
    alice.client.subscribe_root(&root).unwrap();
    alice
        .client
        .grant_collaboration(&root, &UserId::new("bob"), Role::Editor)
        .unwrap();
    pump(&alice.client, &mut alice_session, &server);

    // Alice makes three edits while bob is offline.
    for (clock, title) in [(2, "draft"), (3, "review"), (4, "final")] {
        let mut doc = weave_model::LwwDoc::new();
        doc.set("title", json!(title), clock, "alice");
        alice
            .client
            .update_record(&RecordId::new("root-1"), &doc.encode().unwrap(), Utc::now())
            .unwrap();
    }
    pump(&alice.client, &mut alice_session, &server);

    // Bob comes online and catches up from scratch.
    bob.client.subscribe_root(&root).unwrap();
    pump(&bob.client, &mut bob_session, &server);

    let alice_attrs = alice.store().attributes(&RecordId::new("root-1")).unwrap();
    let bob_attrs = bob.store().attributes(&RecordId::new("root-1")).unwrap();
    assert_eq!(alice_attrs, bob_attrs);
    assert_eq!(alice_attrs["title"], json!("final"));
}

// Record items within one batch for one record must apply in revision
// order; delivering them in a shuffled batch still converges because the
// consumer normalizes.
#[test]
fn shuffled_batch_converges_to_revision_order() {
    let items = vec![
        record_item("rec-1", "root-1", 103, state_bytes("title", json!("newest"), 3, "alice")),
        record_item("rec-1", "root-1", 101, state_bytes("title", json!("oldest"), 1, "alice")),
        record_item("rec-1", "root-1", 102, state_bytes("title", json!("middle"), 2, "alice")),
    ];

    let store = fresh_store();
    let cursors = MemoryCursorStore::new();
    apply_all(&store, &cursors, "root-1", &items);

    assert_eq!(
        store.attributes(&RecordId::new("rec-1")).unwrap(),
        json!({ "title": "newest" })
    );
    assert_eq!(
        cursors.get(Dataset::Records, &RootId::new("root-1")).unwrap(),
        Revision::new(103)
    );
}
