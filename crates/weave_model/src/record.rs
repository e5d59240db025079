//! Synchronized domain types.

use crate::revision::Revision;
use crate::types::{RecordId, RootId, UserId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A synchronized record (page, message, file, ...).
///
/// The `state` blob is the source of truth; `attributes` is the decoded
/// snapshot derived from it and must never diverge. `revision` is assigned
/// by the server sequencer and reassigned on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Globally unique, sortable id.
    pub id: RecordId,
    /// The collaboration root this record belongs to.
    pub root_id: RootId,
    /// Application-level record type ("page", "message", ...).
    pub record_type: String,
    /// Decoded attribute snapshot, derived from `state`.
    pub attributes: Value,
    /// Opaque CRDT state blob, the source of truth.
    pub state: Bytes,
    /// Server-assigned revision.
    pub revision: Revision,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creating user.
    pub created_by: UserId,
    /// Last update time, if updated after creation.
    pub updated_at: Option<DateTime<Utc>>,
    /// Last updating user.
    pub updated_by: Option<UserId>,
}

/// A collaboration role, ordered from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control, including collaboration management.
    Admin,
    /// Can create, edit and delete records.
    Editor,
    /// Can add interactions and reactions only.
    Commenter,
    /// Read-only access.
    Viewer,
}

impl Role {
    /// Returns true if this role can create, edit or delete records.
    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }

    /// Returns true if this role can add interactions and reactions.
    pub fn can_react(&self) -> bool {
        matches!(self, Role::Admin | Role::Editor | Role::Commenter)
    }

    /// Returns true if this role can manage collaborations.
    pub fn can_administer(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Parses a role from its wire name.
    pub fn parse(role: &str) -> Option<Role> {
        match role {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            "commenter" => Some(Role::Commenter),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Returns the role's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Commenter => "commenter",
            Role::Viewer => "viewer",
        }
    }
}

/// A role grant for one user on one root.
///
/// Collaborations are last-writer-wins by revision and are never hard
/// deleted: revocation sets `deleted_at` and bumps the revision, so
/// offline consumers still observe it.
#[derive(Debug, Clone, PartialEq)]
pub struct Collaboration {
    /// The root the grant applies to.
    pub root_id: RootId,
    /// The user the grant applies to.
    pub collaborator_id: UserId,
    /// Granted role.
    pub role: Role,
    /// Server-assigned revision.
    pub revision: Revision,
    /// Revocation marker; a set value means the grant is revoked.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Collaboration {
    /// Returns true if the grant has been revoked.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if an incoming revision supersedes this grant.
    ///
    /// Equal revisions are redelivery of the same row and must not
    /// re-apply.
    pub fn accepts(&self, incoming: Revision) -> bool {
        incoming > self.revision
    }
}

/// A retained deletion marker.
///
/// Tombstones flow through the same cursor mechanism as live rows so that
/// consumers that were offline during the deletion still observe it
/// exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    /// Id of the deleted record.
    pub id: RecordId,
    /// Root of the deleted record.
    pub root_id: RootId,
    /// Server-assigned revision.
    pub revision: Revision,
    /// Deletion time.
    pub deleted_at: DateTime<Utc>,
    /// Deleting user.
    pub deleted_by: UserId,
}

/// Per-user read state for one record.
///
/// Interactions merge field-wise: each timestamp only moves forward, so
/// two devices reading at different times converge without arrival-order
/// coordination.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// The record interacted with.
    pub record_id: RecordId,
    /// Root of the record.
    pub root_id: RootId,
    /// The interacting user.
    pub user_id: UserId,
    /// Server-assigned revision.
    pub revision: Revision,
    /// Last time the record was seen in a list.
    pub seen_at: Option<DateTime<Utc>>,
    /// Last time the record was opened.
    pub opened_at: Option<DateTime<Utc>>,
}

impl Interaction {
    /// Merges another interaction for the same `(record, user)` pair,
    /// keeping the later timestamp per field and the higher revision.
    pub fn merge_from(&mut self, other: &Interaction) {
        self.seen_at = max_time(self.seen_at, other.seen_at);
        self.opened_at = max_time(self.opened_at, other.opened_at);
        self.revision = self.revision.max(other.revision);
    }
}

fn max_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// A user's reaction on a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    /// The record reacted to.
    pub record_id: RecordId,
    /// Root of the record.
    pub root_id: RootId,
    /// The reacting user.
    pub user_id: UserId,
    /// Reaction content (emoji short-name).
    pub reaction: String,
    /// Server-assigned revision.
    pub revision: Revision,
    /// Reaction time.
    pub created_at: DateTime<Utc>,
    /// Retraction marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Reaction {
    /// Returns true if the reaction has been retracted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Admin.can_edit());
        assert!(Role::Editor.can_edit());
        assert!(!Role::Commenter.can_edit());
        assert!(!Role::Viewer.can_edit());

        assert!(Role::Commenter.can_react());
        assert!(!Role::Viewer.can_react());

        assert!(Role::Admin.can_administer());
        assert!(!Role::Editor.can_administer());
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::Admin, Role::Editor, Role::Commenter, Role::Viewer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn collaboration_lww_guard() {
        let collab = Collaboration {
            root_id: RootId::new("root"),
            collaborator_id: UserId::new("u1"),
            role: Role::Editor,
            revision: Revision::new(55),
            deleted_at: None,
        };

        assert!(collab.accepts(Revision::new(56)));
        assert!(!collab.accepts(Revision::new(55)));
        assert!(!collab.accepts(Revision::new(40)));
    }

    #[test]
    fn interaction_merge_is_field_wise() {
        let mut a = Interaction {
            record_id: RecordId::new("rec"),
            root_id: RootId::new("root"),
            user_id: UserId::new("u1"),
            revision: Revision::new(10),
            seen_at: Some(at(100)),
            opened_at: None,
        };
        let b = Interaction {
            seen_at: Some(at(50)),
            opened_at: Some(at(80)),
            revision: Revision::new(12),
            ..a.clone()
        };

        a.merge_from(&b);
        assert_eq!(a.seen_at, Some(at(100)));
        assert_eq!(a.opened_at, Some(at(80)));
        assert_eq!(a.revision, Revision::new(12));
    }

    #[test]
    fn interaction_merge_commutes() {
        let base = Interaction {
            record_id: RecordId::new("rec"),
            root_id: RootId::new("root"),
            user_id: UserId::new("u1"),
            revision: Revision::new(1),
            seen_at: Some(at(10)),
            opened_at: Some(at(5)),
        };
        let other = Interaction {
            revision: Revision::new(2),
            seen_at: Some(at(7)),
            opened_at: Some(at(9)),
            ..base.clone()
        };

        let mut ab = base.clone();
        ab.merge_from(&other);
        let mut ba = other.clone();
        ba.merge_from(&base);

        assert_eq!(ab, ba);
    }
}
