//! Per-dataset batch line items.
//!
//! Every item carries its own revision (as a string) so a consumer can
//! resume mid-batch after a reconnect.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weave_model::{
    Collaboration, Interaction, Reaction, Record, RecordId, Revision, Role, RootId, Tombstone,
    UserId,
};

/// One record in a `records_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordItem {
    /// Record id.
    pub id: RecordId,
    /// Collaboration root.
    pub root_id: RootId,
    /// Application-level record type.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Server-side attribute snapshot.
    ///
    /// Informational only: receivers re-derive attributes from `state`,
    /// which remains the source of truth.
    pub attributes: Value,
    /// Opaque CRDT state blob.
    #[serde(with = "crate::blob")]
    pub state: Bytes,
    /// This row's revision, the line-item cursor.
    pub revision: Revision,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creating user.
    pub created_by: UserId,
    /// Last update time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last updating user.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_by: Option<UserId>,
}

impl From<&Record> for RecordItem {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            root_id: record.root_id.clone(),
            record_type: record.record_type.clone(),
            attributes: record.attributes.clone(),
            state: record.state.clone(),
            revision: record.revision,
            created_at: record.created_at,
            created_by: record.created_by.clone(),
            updated_at: record.updated_at,
            updated_by: record.updated_by.clone(),
        }
    }
}

/// One role grant in a `collaborations_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationItem {
    /// Collaboration root.
    pub root_id: RootId,
    /// The user the grant applies to.
    pub collaborator_id: UserId,
    /// Granted role.
    pub role: Role,
    /// This row's revision.
    pub revision: Revision,
    /// Revocation marker.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Collaboration> for CollaborationItem {
    fn from(collaboration: &Collaboration) -> Self {
        Self {
            root_id: collaboration.root_id.clone(),
            collaborator_id: collaboration.collaborator_id.clone(),
            role: collaboration.role,
            revision: collaboration.revision,
            deleted_at: collaboration.deleted_at,
        }
    }
}

impl CollaborationItem {
    /// Converts the item into its domain form.
    pub fn into_collaboration(self) -> Collaboration {
        Collaboration {
            root_id: self.root_id,
            collaborator_id: self.collaborator_id,
            role: self.role,
            revision: self.revision,
            deleted_at: self.deleted_at,
        }
    }
}

/// One deletion marker in a `tombstones_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstoneItem {
    /// Id of the deleted record.
    pub id: RecordId,
    /// Root of the deleted record.
    pub root_id: RootId,
    /// This row's revision.
    pub revision: Revision,
    /// Deletion time.
    pub deleted_at: DateTime<Utc>,
    /// Deleting user.
    pub deleted_by: UserId,
}

impl From<&Tombstone> for TombstoneItem {
    fn from(tombstone: &Tombstone) -> Self {
        Self {
            id: tombstone.id.clone(),
            root_id: tombstone.root_id.clone(),
            revision: tombstone.revision,
            deleted_at: tombstone.deleted_at,
            deleted_by: tombstone.deleted_by.clone(),
        }
    }
}

impl TombstoneItem {
    /// Converts the item into its domain form.
    pub fn into_tombstone(self) -> Tombstone {
        Tombstone {
            id: self.id,
            root_id: self.root_id,
            revision: self.revision,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
        }
    }
}

/// One read-state row in an `interactions_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionItem {
    /// The record interacted with.
    pub record_id: RecordId,
    /// Root of the record.
    pub root_id: RootId,
    /// The interacting user.
    pub user_id: UserId,
    /// This row's revision.
    pub revision: Revision,
    /// Last seen time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seen_at: Option<DateTime<Utc>>,
    /// Last opened time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub opened_at: Option<DateTime<Utc>>,
}

impl From<&Interaction> for InteractionItem {
    fn from(interaction: &Interaction) -> Self {
        Self {
            record_id: interaction.record_id.clone(),
            root_id: interaction.root_id.clone(),
            user_id: interaction.user_id.clone(),
            revision: interaction.revision,
            seen_at: interaction.seen_at,
            opened_at: interaction.opened_at,
        }
    }
}

impl InteractionItem {
    /// Converts the item into its domain form.
    pub fn into_interaction(self) -> Interaction {
        Interaction {
            record_id: self.record_id,
            root_id: self.root_id,
            user_id: self.user_id,
            revision: self.revision,
            seen_at: self.seen_at,
            opened_at: self.opened_at,
        }
    }
}

/// One reaction row in a `reactions_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionItem {
    /// The record reacted to.
    pub record_id: RecordId,
    /// Root of the record.
    pub root_id: RootId,
    /// The reacting user.
    pub user_id: UserId,
    /// Reaction content.
    pub reaction: String,
    /// This row's revision.
    pub revision: Revision,
    /// Reaction time.
    pub created_at: DateTime<Utc>,
    /// Retraction marker.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Reaction> for ReactionItem {
    fn from(reaction: &Reaction) -> Self {
        Self {
            record_id: reaction.record_id.clone(),
            root_id: reaction.root_id.clone(),
            user_id: reaction.user_id.clone(),
            reaction: reaction.reaction.clone(),
            revision: reaction.revision,
            created_at: reaction.created_at,
            deleted_at: reaction.deleted_at,
        }
    }
}

impl ReactionItem {
    /// Converts the item into its domain form.
    pub fn into_reaction(self) -> Reaction {
        Reaction {
            record_id: self.record_id,
            root_id: self.root_id,
            user_id: self.user_id,
            reaction: self.reaction,
            revision: self.revision,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn record_item_revision_is_a_string() {
        let item = RecordItem {
            id: RecordId::new("rec-1"),
            root_id: RootId::new("root-1"),
            record_type: "page".into(),
            attributes: json!({ "title": "hi" }),
            state: Bytes::from_static(&[1, 2]),
            revision: Revision::new(101),
            created_at: at(1_000),
            created_by: UserId::new("u1"),
            updated_at: None,
            updated_by: None,
        };

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["revision"], json!("101"));
        assert_eq!(value["type"], json!("page"));
        // Absent optionals are omitted, not null.
        assert!(value.get("updated_at").is_none());

        let back: RecordItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn collaboration_item_roundtrip() {
        let collab = Collaboration {
            root_id: RootId::new("root-1"),
            collaborator_id: UserId::new("u1"),
            role: Role::Commenter,
            revision: Revision::new(55),
            deleted_at: Some(at(9_000)),
        };

        let item = CollaborationItem::from(&collab);
        let json = serde_json::to_string(&item).unwrap();
        let back: CollaborationItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_collaboration(), collab);
    }

    #[test]
    fn tombstone_item_roundtrip() {
        let tombstone = Tombstone {
            id: RecordId::new("rec-1"),
            root_id: RootId::new("root-1"),
            revision: Revision::new(55),
            deleted_at: at(5_000),
            deleted_by: UserId::new("u1"),
        };

        let item = TombstoneItem::from(&tombstone);
        let json = serde_json::to_string(&item).unwrap();
        let back: TombstoneItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_tombstone(), tombstone);
    }
}
