//! Change notification events.

use serde::{Deserialize, Serialize};
use weave_model::{Dataset, RecordId, Revision, RootId, UserId};

/// A committed change, published after the row write.
///
/// Events exist to wake synchronizers and invalidate live queries; they
/// carry only the keys needed for a cheap relevance check, never payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A record was created.
    RecordCreated {
        /// Root of the record.
        root_id: RootId,
        /// The created record.
        record_id: RecordId,
        /// Revision assigned to the write.
        revision: Revision,
    },
    /// A record's state was updated.
    RecordUpdated {
        /// Root of the record.
        root_id: RootId,
        /// The updated record.
        record_id: RecordId,
        /// Revision assigned to the write.
        revision: Revision,
    },
    /// A record was deleted and a tombstone written.
    RecordDeleted {
        /// Root of the record.
        root_id: RootId,
        /// The deleted record.
        record_id: RecordId,
        /// Revision assigned to the tombstone.
        revision: Revision,
    },
    /// A collaboration was granted, changed or revoked.
    CollaborationChanged {
        /// Root of the grant.
        root_id: RootId,
        /// The affected user.
        collaborator_id: UserId,
        /// Revision assigned to the write.
        revision: Revision,
    },
    /// An interaction row was upserted.
    InteractionChanged {
        /// Root of the record.
        root_id: RootId,
        /// The interacted record.
        record_id: RecordId,
        /// Revision assigned to the write.
        revision: Revision,
    },
    /// A reaction row was upserted or retracted.
    ReactionChanged {
        /// Root of the record.
        root_id: RootId,
        /// The reacted record.
        record_id: RecordId,
        /// Revision assigned to the write.
        revision: Revision,
    },
}

impl Event {
    /// Returns the root the event belongs to.
    pub fn root_id(&self) -> &RootId {
        match self {
            Event::RecordCreated { root_id, .. }
            | Event::RecordUpdated { root_id, .. }
            | Event::RecordDeleted { root_id, .. }
            | Event::CollaborationChanged { root_id, .. }
            | Event::InteractionChanged { root_id, .. }
            | Event::ReactionChanged { root_id, .. } => root_id,
        }
    }

    /// Returns the dataset whose rows the event touched.
    ///
    /// A deletion touches the tombstones dataset: the record row is gone,
    /// so only tombstone subscribers have anything new to fetch.
    pub fn dataset(&self) -> Dataset {
        match self {
            Event::RecordCreated { .. } | Event::RecordUpdated { .. } => Dataset::Records,
            Event::RecordDeleted { .. } => Dataset::Tombstones,
            Event::CollaborationChanged { .. } => Dataset::Collaborations,
            Event::InteractionChanged { .. } => Dataset::Interactions,
            Event::ReactionChanged { .. } => Dataset::Reactions,
        }
    }

    /// Returns the revision assigned to the underlying write.
    pub fn revision(&self) -> Revision {
        match self {
            Event::RecordCreated { revision, .. }
            | Event::RecordUpdated { revision, .. }
            | Event::RecordDeleted { revision, .. }
            | Event::CollaborationChanged { revision, .. }
            | Event::InteractionChanged { revision, .. }
            | Event::ReactionChanged { revision, .. } => *revision,
        }
    }
}
