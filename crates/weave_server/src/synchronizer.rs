//! Per-subscription push state machine.

use crate::store::ServerStore;
use tracing::debug;
use weave_bus::Event;
use weave_model::{Dataset, Revision, RootId, UserId};
use weave_protocol::{
    CollaborationItem, InteractionItem, ReactionItem, RecordItem, ServerMessage, TombstoneItem,
};

/// The state of one synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizerStatus {
    /// No cursor established yet; events are ignored.
    Idle,
    /// Cursor known, waiting for a trigger.
    Pending,
    /// A batch query is in flight; further triggers coalesce into it.
    Fetching,
}

/// Server-side push component for one `(user, root, dataset)`
/// subscription.
///
/// Driven by two triggers: an explicit `consume_<dataset>` message, and
/// relevant events from the bus filtered through [`Synchronizer::should_fetch`].
/// At most one fetch runs at a time, enforced by the status field alone;
/// triggers that arrive mid-fetch are dropped because the in-flight query
/// already sees anything committed before it read, and anything after it
/// re-triggers through its own event.
pub struct Synchronizer {
    dataset: Dataset,
    user_id: UserId,
    root_id: RootId,
    cursor: Option<Revision>,
    status: SynchronizerStatus,
    batch_limit: usize,
}

impl Synchronizer {
    /// Creates an idle synchronizer.
    pub fn new(dataset: Dataset, user_id: UserId, root_id: RootId, batch_limit: usize) -> Self {
        Self {
            dataset,
            user_id,
            root_id,
            cursor: None,
            status: SynchronizerStatus::Idle,
            batch_limit,
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> SynchronizerStatus {
        self.status
    }

    /// Returns the current cursor.
    pub fn cursor(&self) -> Option<Revision> {
        self.cursor
    }

    /// Returns the subscribed dataset.
    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    /// Seats the cursor from a client `consume_<dataset>` message.
    ///
    /// The client's value always wins, even when this synchronizer already
    /// advanced past it: after a dropped connection the client's cursor is
    /// the only one that reflects what was actually applied, and duplicate
    /// delivery is absorbed by idempotent merge on the client.
    pub fn consume(&mut self, cursor: Revision) {
        debug!(
            dataset = %self.dataset,
            root = %self.root_id,
            %cursor,
            "re-seating cursor from consumer"
        );
        self.cursor = Some(cursor);
        if self.status == SynchronizerStatus::Idle {
            self.status = SynchronizerStatus::Pending;
        }
    }

    /// Cheap relevance predicate for the event stream.
    pub fn should_fetch(&self, event: &Event) -> bool {
        self.cursor.is_some()
            && event.dataset() == self.dataset
            && event.root_id() == &self.root_id
    }

    /// Handles a bus event: fetch if relevant, otherwise nothing.
    pub fn on_event(&mut self, event: &Event, store: &ServerStore) -> Option<ServerMessage> {
        if !self.should_fetch(event) {
            return None;
        }
        self.fetch(store)
    }

    /// Runs one batch query from the cursor.
    ///
    /// An empty result sends nothing (idle clients stay asleep). A
    /// non-empty result becomes one batch message, with every item
    /// carrying its own revision, and advances the cursor to the last
    /// item's revision.
    pub fn fetch(&mut self, store: &ServerStore) -> Option<ServerMessage> {
        if self.status == SynchronizerStatus::Fetching {
            debug!(dataset = %self.dataset, root = %self.root_id, "fetch already in flight");
            return None;
        }
        let cursor = self.cursor?;
        self.status = SynchronizerStatus::Fetching;

        let message = self.query(store, cursor);

        if let Some(last) = message.as_ref().and_then(|m| m.last_revision()) {
            self.cursor = Some(last);
        }
        self.status = SynchronizerStatus::Pending;
        message
    }

    fn query(&self, store: &ServerStore, cursor: Revision) -> Option<ServerMessage> {
        let user_id = self.user_id.clone();
        let root_id = self.root_id.clone();

        let message = match self.dataset {
            Dataset::Records => {
                let items: Vec<RecordItem> = store
                    .records_after(&root_id, cursor, self.batch_limit)
                    .iter()
                    .map(RecordItem::from)
                    .collect();
                ServerMessage::RecordsBatch {
                    user_id,
                    root_id,
                    items,
                }
            }
            Dataset::Collaborations => {
                let items: Vec<CollaborationItem> = store
                    .collaborations_after(&root_id, cursor, self.batch_limit)
                    .iter()
                    .map(CollaborationItem::from)
                    .collect();
                ServerMessage::CollaborationsBatch {
                    user_id,
                    root_id,
                    items,
                }
            }
            Dataset::Tombstones => {
                let items: Vec<TombstoneItem> = store
                    .tombstones_after(&root_id, cursor, self.batch_limit)
                    .iter()
                    .map(TombstoneItem::from)
                    .collect();
                ServerMessage::TombstonesBatch {
                    user_id,
                    root_id,
                    items,
                }
            }
            Dataset::Interactions => {
                let items: Vec<InteractionItem> = store
                    .interactions_after(&root_id, cursor, self.batch_limit)
                    .iter()
                    .map(InteractionItem::from)
                    .collect();
                ServerMessage::InteractionsBatch {
                    user_id,
                    root_id,
                    items,
                }
            }
            Dataset::Reactions => {
                let items: Vec<ReactionItem> = store
                    .reactions_after(&root_id, cursor, self.batch_limit)
                    .iter()
                    .map(ReactionItem::from)
                    .collect();
                ServerMessage::ReactionsBatch {
                    user_id,
                    root_id,
                    items,
                }
            }
        };

        if message.item_count() == 0 {
            None
        } else {
            Some(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use weave_model::{LwwCrdt, LwwDoc, RecordId};

    fn store() -> ServerStore {
        ServerStore::new(Arc::new(LwwCrdt::new()))
    }

    fn update(value: serde_json::Value, clock: u64) -> Bytes {
        let mut doc = LwwDoc::new();
        doc.set("title", value, clock, "test");
        doc.encode().unwrap()
    }

    fn seed_records(store: &ServerStore, root: &str, count: usize) {
        for i in 0..count {
            store
                .create_record(
                    &RecordId::new(format!("rec-{i}")),
                    &RootId::new(root),
                    "page",
                    &update(json!(i), 1),
                    &UserId::new("u1"),
                    Utc::now(),
                )
                .unwrap();
        }
    }

    fn synchronizer(root: &str) -> Synchronizer {
        Synchronizer::new(
            Dataset::Records,
            UserId::new("u1"),
            RootId::new(root),
            20,
        )
    }

    #[test]
    fn idle_until_first_consume() {
        let store = store();
        seed_records(&store, "root-1", 1);

        let mut sync = synchronizer("root-1");
        assert_eq!(sync.status(), SynchronizerStatus::Idle);

        // No cursor: events are irrelevant and fetch returns nothing.
        let event = Event::RecordCreated {
            root_id: RootId::new("root-1"),
            record_id: RecordId::new("rec-0"),
            revision: Revision::new(1),
        };
        assert!(!sync.should_fetch(&event));
        assert!(sync.fetch(&store).is_none());

        sync.consume(Revision::ZERO);
        assert_eq!(sync.status(), SynchronizerStatus::Pending);
        assert!(sync.fetch(&store).is_some());
    }

    #[test]
    fn empty_result_sends_nothing() {
        let store = store();
        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);

        assert!(sync.fetch(&store).is_none());
        assert_eq!(sync.status(), SynchronizerStatus::Pending);
        // Cursor is untouched by an empty fetch.
        assert_eq!(sync.cursor(), Some(Revision::ZERO));
    }

    #[test]
    fn batch_is_capped_and_cursor_advances_to_last_item() {
        let store = store();
        seed_records(&store, "root-1", 25);

        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);

        let message = sync.fetch(&store).unwrap();
        assert_eq!(message.item_count(), 20);
        assert_eq!(sync.cursor(), Some(Revision::new(20)));

        // The explicit consume with the applied cursor pulls the rest.
        sync.consume(Revision::new(20));
        let message = sync.fetch(&store).unwrap();
        assert_eq!(message.item_count(), 5);
        assert_eq!(sync.cursor(), Some(Revision::new(25)));
    }

    #[test]
    fn should_fetch_filters_dataset_and_root() {
        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);

        let relevant = Event::RecordUpdated {
            root_id: RootId::new("root-1"),
            record_id: RecordId::new("rec-0"),
            revision: Revision::new(2),
        };
        let wrong_root = Event::RecordUpdated {
            root_id: RootId::new("root-2"),
            record_id: RecordId::new("rec-0"),
            revision: Revision::new(2),
        };
        let wrong_dataset = Event::ReactionChanged {
            root_id: RootId::new("root-1"),
            record_id: RecordId::new("rec-0"),
            revision: Revision::new(2),
        };

        assert!(sync.should_fetch(&relevant));
        assert!(!sync.should_fetch(&wrong_root));
        assert!(!sync.should_fetch(&wrong_dataset));
    }

    #[test]
    fn reentrant_trigger_is_coalesced() {
        let store = store();
        seed_records(&store, "root-1", 1);

        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);

        // Simulate a fetch already in flight.
        sync.status = SynchronizerStatus::Fetching;
        assert!(sync.fetch(&store).is_none());
        assert_eq!(sync.cursor(), Some(Revision::ZERO));

        sync.status = SynchronizerStatus::Pending;
        assert!(sync.fetch(&store).is_some());
    }

    #[test]
    fn stale_client_cursor_is_trusted() {
        let store = store();
        seed_records(&store, "root-1", 3);

        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);
        sync.fetch(&store).unwrap();
        assert_eq!(sync.cursor(), Some(Revision::new(3)));

        // The client reconnects claiming less progress; re-serve from its
        // cursor even though this synchronizer was further along.
        sync.consume(Revision::new(1));
        let message = sync.fetch(&store).unwrap();
        assert_eq!(message.item_count(), 2);
    }

    #[test]
    fn event_triggers_fetch_for_matching_subscription() {
        let store = store();
        seed_records(&store, "root-1", 1);

        let mut sync = synchronizer("root-1");
        sync.consume(Revision::ZERO);

        let event = Event::RecordCreated {
            root_id: RootId::new("root-1"),
            record_id: RecordId::new("rec-0"),
            revision: Revision::new(1),
        };
        let message = sync.on_event(&event, &store).unwrap();
        assert_eq!(message.item_count(), 1);

        // Unrelated event: no query, no message.
        let other = Event::RecordCreated {
            root_id: RootId::new("root-9"),
            record_id: RecordId::new("rec-9"),
            revision: Revision::new(9),
        };
        assert!(sync.on_event(&other, &store).is_none());
    }
}
