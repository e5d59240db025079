//! Per-subscription pull/apply state machine.

use crate::cursors::CursorStore;
use crate::error::ClientResult;
use crate::store::LocalStore;
use tracing::{debug, warn};
use weave_model::{Dataset, Revision, RootId, UserId};
use weave_protocol::{ClientMessage, ServerMessage};

/// The state of one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// Waiting for a batch.
    Idle,
    /// Applying a batch; further batches are dropped until done.
    Syncing,
}

/// Client-side mirror of one server synchronizer.
///
/// On init it restores the persisted cursor and issues a consume request.
/// Each batch is applied strictly in revision order; the cursor is then
/// persisted as the last item's revision and a fresh consume goes out. A
/// batch arriving while one is being applied is dropped with a log; the
/// server re-serves from whatever cursor the next consume carries, so
/// nothing is lost.
pub struct Consumer {
    dataset: Dataset,
    user_id: UserId,
    root_id: RootId,
    status: ConsumerStatus,
}

impl Consumer {
    /// Creates an idle consumer.
    pub fn new(dataset: Dataset, user_id: UserId, root_id: RootId) -> Self {
        Self {
            dataset,
            user_id,
            root_id,
            status: ConsumerStatus::Idle,
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> ConsumerStatus {
        self.status
    }

    /// Returns the subscribed dataset.
    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    /// Restores the persisted cursor and builds the initial consume
    /// request.
    pub fn init(&mut self, cursors: &dyn CursorStore) -> ClientResult<ClientMessage> {
        self.status = ConsumerStatus::Idle;
        let cursor = cursors.get(self.dataset, &self.root_id)?;
        debug!(dataset = %self.dataset, root = %self.root_id, %cursor, "consumer starting");
        Ok(self.consume_message(cursor))
    }

    /// Handles one batch, returning the follow-up consume request.
    ///
    /// Item failures are logged and skipped: one bad item must not stall
    /// the stream. A failure at the batch boundary (cursor persistence)
    /// leaves the cursor unadvanced so the same batch is redelivered;
    /// idempotent merge absorbs the duplicate.
    pub fn on_batch(
        &mut self,
        message: &ServerMessage,
        store: &LocalStore,
        cursors: &dyn CursorStore,
    ) -> Option<ClientMessage> {
        if message.dataset() != Some(self.dataset) || message.root_id() != Some(&self.root_id) {
            warn!(dataset = %self.dataset, root = %self.root_id, "batch for another subscription; dropping");
            return None;
        }
        if self.status == ConsumerStatus::Syncing {
            debug!(dataset = %self.dataset, root = %self.root_id, "batch while syncing; dropping");
            return None;
        }
        self.status = ConsumerStatus::Syncing;

        let previous = match cursors.get(self.dataset, &self.root_id) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "cursor read failed at batch boundary; batch will be redelivered");
                self.status = ConsumerStatus::Idle;
                return None;
            }
        };

        let last = self.apply_batch(message, store);
        self.status = ConsumerStatus::Idle;

        let Some(last) = last else {
            // Servers do not send empty batches; nothing to do.
            return None;
        };

        match cursors.set(self.dataset, &self.root_id, last) {
            Ok(()) => Some(self.consume_message(last)),
            Err(e) => {
                warn!(error = %e, "cursor persist failed; re-requesting the same batch");
                Some(self.consume_message(previous))
            }
        }
    }

    fn apply_batch(&self, message: &ServerMessage, store: &LocalStore) -> Option<Revision> {
        match message {
            ServerMessage::RecordsBatch { items, .. } => {
                apply_in_order(items, |i| i.revision, |i| store.apply_record(i))
            }
            ServerMessage::CollaborationsBatch { items, .. } => apply_in_order(
                items,
                |i| i.revision,
                |i| store.apply_collaboration(i).map(|_| ()),
            ),
            ServerMessage::TombstonesBatch { items, .. } => {
                apply_in_order(items, |i| i.revision, |i| store.apply_tombstone(i))
            }
            ServerMessage::InteractionsBatch { items, .. } => {
                apply_in_order(items, |i| i.revision, |i| store.apply_interaction(i))
            }
            ServerMessage::ReactionsBatch { items, .. } => {
                apply_in_order(items, |i| i.revision, |i| store.apply_reaction(i))
            }
            ServerMessage::MutationResults { .. } | ServerMessage::Heartbeat => None,
        }
    }

    fn consume_message(&self, cursor: Revision) -> ClientMessage {
        ClientMessage::consume(
            self.dataset,
            self.user_id.clone(),
            self.root_id.clone(),
            cursor,
        )
    }
}

/// Applies items in ascending revision order, isolating item failures.
///
/// Batches arrive already ordered; a disordered batch is normalized (and
/// logged) before applying, since dependent attribute derivations rely on
/// arrival order matching revision order.
fn apply_in_order<T>(
    items: &[T],
    revision_of: impl Fn(&T) -> Revision,
    mut apply: impl FnMut(&T) -> ClientResult<()>,
) -> Option<Revision> {
    let sorted = items
        .windows(2)
        .all(|pair| revision_of(&pair[0]) <= revision_of(&pair[1]));

    let mut ordered: Vec<&T> = items.iter().collect();
    if !sorted {
        warn!("batch items out of revision order; normalizing before apply");
        ordered.sort_by_key(|item| revision_of(item));
    }

    let mut last = None;
    for item in ordered {
        if let Err(e) = apply(item) {
            warn!(error = %e, "batch item failed to apply; continuing");
        }
        last = Some(revision_of(item));
    }
    last
}
