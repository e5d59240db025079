//! Mutation submission types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use weave_model::{RecordId, Role, RootId, UserId};

/// A single client mutation: `{ id, type, data }`.
///
/// The id is client-generated and is echoed back in the matching
/// [`MutationResult`], which is also how the outbox acknowledges delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Client-generated mutation id.
    pub id: String,
    /// The operation and its payload.
    #[serde(flatten)]
    pub kind: MutationKind,
}

impl Mutation {
    /// Creates a mutation with a fresh id.
    pub fn new(kind: MutationKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
        }
    }
}

/// The closed set of mutation operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MutationKind {
    /// Create a record from an initial CRDT update.
    CreateRecord {
        /// New record id.
        id: RecordId,
        /// Collaboration root; equal to `id` when creating the root itself.
        root_id: RootId,
        /// Application-level record type.
        record_type: String,
        /// Initial CRDT update.
        #[serde(with = "crate::blob")]
        update: Bytes,
        /// Client-side creation time.
        created_at: DateTime<Utc>,
    },
    /// Merge a CRDT update into an existing record.
    UpdateRecord {
        /// Target record.
        id: RecordId,
        /// Collaboration root.
        root_id: RootId,
        /// CRDT update to merge.
        #[serde(with = "crate::blob")]
        update: Bytes,
        /// Client-side update time.
        updated_at: DateTime<Utc>,
    },
    /// Delete a record, leaving a tombstone.
    DeleteRecord {
        /// Target record.
        id: RecordId,
        /// Collaboration root.
        root_id: RootId,
        /// Client-side deletion time.
        deleted_at: DateTime<Utc>,
    },
    /// Grant or change a collaborator's role.
    UpsertCollaboration {
        /// Collaboration root.
        root_id: RootId,
        /// The user being granted.
        collaborator_id: UserId,
        /// The granted role.
        role: Role,
    },
    /// Revoke a collaborator's access.
    DeleteCollaboration {
        /// Collaboration root.
        root_id: RootId,
        /// The user being revoked.
        collaborator_id: UserId,
        /// Client-side revocation time.
        deleted_at: DateTime<Utc>,
    },
    /// Record read state for the submitting user.
    UpsertInteraction {
        /// Target record.
        record_id: RecordId,
        /// Collaboration root.
        root_id: RootId,
        /// Seen time, if the record was seen.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        seen_at: Option<DateTime<Utc>>,
        /// Opened time, if the record was opened.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        opened_at: Option<DateTime<Utc>>,
    },
    /// Add a reaction for the submitting user.
    UpsertReaction {
        /// Target record.
        record_id: RecordId,
        /// Collaboration root.
        root_id: RootId,
        /// Reaction content.
        reaction: String,
        /// Client-side reaction time.
        created_at: DateTime<Utc>,
    },
    /// Retract a reaction.
    DeleteReaction {
        /// Target record.
        record_id: RecordId,
        /// Collaboration root.
        root_id: RootId,
        /// Reaction content.
        reaction: String,
        /// Client-side retraction time.
        deleted_at: DateTime<Utc>,
    },
}

impl MutationKind {
    /// Returns the collaboration root the mutation targets.
    pub fn root_id(&self) -> &RootId {
        match self {
            MutationKind::CreateRecord { root_id, .. }
            | MutationKind::UpdateRecord { root_id, .. }
            | MutationKind::DeleteRecord { root_id, .. }
            | MutationKind::UpsertCollaboration { root_id, .. }
            | MutationKind::DeleteCollaboration { root_id, .. }
            | MutationKind::UpsertInteraction { root_id, .. }
            | MutationKind::UpsertReaction { root_id, .. }
            | MutationKind::DeleteReaction { root_id, .. } => root_id,
        }
    }
}

/// Outcome of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    /// Applied.
    Ok,
    /// The user has no live collaboration on the target root.
    Forbidden,
    /// The user's role does not permit the operation.
    NotAllowed,
    /// The server failed internally; safe to redeliver.
    InternalError,
}

impl MutationStatus {
    /// Returns true if redelivering the mutation cannot change the
    /// outcome, so the outbox should drop it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MutationStatus::InternalError)
    }
}

/// Per-mutation outcome, one per submitted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Echo of the mutation id.
    pub id: String,
    /// Outcome status.
    pub status: MutationStatus,
}

/// HTTP-form mutation submission body: `{ mutations: [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// The submitted mutations, applied in order.
    pub mutations: Vec<Mutation>,
}

/// HTTP-form mutation response body: `{ results: [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// One result per submitted mutation, in submission order.
    pub results: Vec<MutationResult>,
}
