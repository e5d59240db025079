//! Socket envelopes, one closed tagged union per direction.

use crate::items::{
    CollaborationItem, InteractionItem, ReactionItem, RecordItem, TombstoneItem,
};
use crate::mutation::{Mutation, MutationResult};
use serde::{Deserialize, Serialize};
use weave_model::{Dataset, Revision, RootId, UserId};

/// Client → server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Binds the socket to the user that was issued `socket_id`.
    ///
    /// Must be the first frame on a new connection; socket ids are
    /// single-use and come from a prior handshake call outside the socket.
    Handshake {
        /// The issued socket id.
        socket_id: String,
    },
    /// Subscribe to the records dataset of one root.
    ConsumeRecords {
        /// Subscribing user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Last applied revision; `"0"` requests a full resync.
        cursor: Revision,
    },
    /// Subscribe to the collaborations dataset of one root.
    ConsumeCollaborations {
        /// Subscribing user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Last applied revision.
        cursor: Revision,
    },
    /// Subscribe to the tombstones dataset of one root.
    ConsumeTombstones {
        /// Subscribing user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Last applied revision.
        cursor: Revision,
    },
    /// Subscribe to the interactions dataset of one root.
    ConsumeInteractions {
        /// Subscribing user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Last applied revision.
        cursor: Revision,
    },
    /// Subscribe to the reactions dataset of one root.
    ConsumeReactions {
        /// Subscribing user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Last applied revision.
        cursor: Revision,
    },
    /// Submit a batch of mutations.
    Mutations {
        /// The mutations, applied in order.
        mutations: Vec<Mutation>,
    },
    /// Liveness probe.
    Heartbeat,
}

impl ClientMessage {
    /// Builds the consume message for a dataset.
    pub fn consume(dataset: Dataset, user_id: UserId, root_id: RootId, cursor: Revision) -> Self {
        match dataset {
            Dataset::Records => ClientMessage::ConsumeRecords {
                user_id,
                root_id,
                cursor,
            },
            Dataset::Collaborations => ClientMessage::ConsumeCollaborations {
                user_id,
                root_id,
                cursor,
            },
            Dataset::Tombstones => ClientMessage::ConsumeTombstones {
                user_id,
                root_id,
                cursor,
            },
            Dataset::Interactions => ClientMessage::ConsumeInteractions {
                user_id,
                root_id,
                cursor,
            },
            Dataset::Reactions => ClientMessage::ConsumeReactions {
                user_id,
                root_id,
                cursor,
            },
        }
    }

    /// Splits a consume message into `(dataset, user, root, cursor)`.
    pub fn consume_parts(&self) -> Option<(Dataset, &UserId, &RootId, Revision)> {
        match self {
            ClientMessage::ConsumeRecords {
                user_id,
                root_id,
                cursor,
            } => Some((Dataset::Records, user_id, root_id, *cursor)),
            ClientMessage::ConsumeCollaborations {
                user_id,
                root_id,
                cursor,
            } => Some((Dataset::Collaborations, user_id, root_id, *cursor)),
            ClientMessage::ConsumeTombstones {
                user_id,
                root_id,
                cursor,
            } => Some((Dataset::Tombstones, user_id, root_id, *cursor)),
            ClientMessage::ConsumeInteractions {
                user_id,
                root_id,
                cursor,
            } => Some((Dataset::Interactions, user_id, root_id, *cursor)),
            ClientMessage::ConsumeReactions {
                user_id,
                root_id,
                cursor,
            } => Some((Dataset::Reactions, user_id, root_id, *cursor)),
            ClientMessage::Handshake { .. }
            | ClientMessage::Mutations { .. }
            | ClientMessage::Heartbeat => None,
        }
    }
}

/// Server → client envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A batch from the records dataset, in ascending revision order.
    RecordsBatch {
        /// Subscribed user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Batch items.
        items: Vec<RecordItem>,
    },
    /// A batch from the collaborations dataset.
    CollaborationsBatch {
        /// Subscribed user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Batch items.
        items: Vec<CollaborationItem>,
    },
    /// A batch from the tombstones dataset.
    TombstonesBatch {
        /// Subscribed user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Batch items.
        items: Vec<TombstoneItem>,
    },
    /// A batch from the interactions dataset.
    InteractionsBatch {
        /// Subscribed user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Batch items.
        items: Vec<InteractionItem>,
    },
    /// A batch from the reactions dataset.
    ReactionsBatch {
        /// Subscribed user.
        user_id: UserId,
        /// Subscribed root.
        root_id: RootId,
        /// Batch items.
        items: Vec<ReactionItem>,
    },
    /// Outcomes for a submitted mutation batch, in submission order.
    MutationResults {
        /// One result per mutation.
        results: Vec<MutationResult>,
    },
    /// Liveness probe.
    Heartbeat,
}

impl ServerMessage {
    /// Returns the dataset a batch message belongs to.
    pub fn dataset(&self) -> Option<Dataset> {
        match self {
            ServerMessage::RecordsBatch { .. } => Some(Dataset::Records),
            ServerMessage::CollaborationsBatch { .. } => Some(Dataset::Collaborations),
            ServerMessage::TombstonesBatch { .. } => Some(Dataset::Tombstones),
            ServerMessage::InteractionsBatch { .. } => Some(Dataset::Interactions),
            ServerMessage::ReactionsBatch { .. } => Some(Dataset::Reactions),
            ServerMessage::MutationResults { .. } | ServerMessage::Heartbeat => None,
        }
    }

    /// Returns the root a batch message belongs to.
    pub fn root_id(&self) -> Option<&RootId> {
        match self {
            ServerMessage::RecordsBatch { root_id, .. }
            | ServerMessage::CollaborationsBatch { root_id, .. }
            | ServerMessage::TombstonesBatch { root_id, .. }
            | ServerMessage::InteractionsBatch { root_id, .. }
            | ServerMessage::ReactionsBatch { root_id, .. } => Some(root_id),
            ServerMessage::MutationResults { .. } | ServerMessage::Heartbeat => None,
        }
    }

    /// Returns the number of items in a batch message.
    pub fn item_count(&self) -> usize {
        match self {
            ServerMessage::RecordsBatch { items, .. } => items.len(),
            ServerMessage::CollaborationsBatch { items, .. } => items.len(),
            ServerMessage::TombstonesBatch { items, .. } => items.len(),
            ServerMessage::InteractionsBatch { items, .. } => items.len(),
            ServerMessage::ReactionsBatch { items, .. } => items.len(),
            ServerMessage::MutationResults { .. } | ServerMessage::Heartbeat => 0,
        }
    }

    /// Returns the revision of the last item in a batch message.
    pub fn last_revision(&self) -> Option<Revision> {
        match self {
            ServerMessage::RecordsBatch { items, .. } => items.last().map(|i| i.revision),
            ServerMessage::CollaborationsBatch { items, .. } => items.last().map(|i| i.revision),
            ServerMessage::TombstonesBatch { items, .. } => items.last().map(|i| i.revision),
            ServerMessage::InteractionsBatch { items, .. } => items.last().map(|i| i.revision),
            ServerMessage::ReactionsBatch { items, .. } => items.last().map(|i| i.revision),
            ServerMessage::MutationResults { .. } | ServerMessage::Heartbeat => None,
        }
    }
}
