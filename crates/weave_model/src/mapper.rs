//! Explicit row ↔ domain mappers.
//!
//! The relational layer is an external collaborator; it hands the sync
//! core plain rows with primitive column types. Mapping into domain
//! objects is spelled out field by field here so it can be unit-tested
//! independently of the sync logic.

use crate::error::{ModelError, ModelResult};
use crate::record::{Collaboration, Record, Role, Tombstone};
use crate::revision::Revision;
use crate::types::{RecordId, RootId, UserId};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A raw record row as stored in the records table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    /// `id` column.
    pub id: String,
    /// `root_id` column.
    pub root_id: String,
    /// `type` column.
    pub record_type: String,
    /// `attributes` column (JSON text).
    pub attributes: String,
    /// `state` column (opaque blob).
    pub state: Vec<u8>,
    /// `revision` column (database bigint).
    pub revision: i64,
    /// `created_at` column.
    pub created_at: DateTime<Utc>,
    /// `created_by` column.
    pub created_by: String,
    /// `updated_at` column.
    pub updated_at: Option<DateTime<Utc>>,
    /// `updated_by` column.
    pub updated_by: Option<String>,
}

/// A raw collaboration row.
#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationRow {
    /// `root_id` column.
    pub root_id: String,
    /// `collaborator_id` column.
    pub collaborator_id: String,
    /// `role` column.
    pub role: String,
    /// `revision` column (database bigint).
    pub revision: i64,
    /// `deleted_at` column.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A raw tombstone row.
#[derive(Debug, Clone, PartialEq)]
pub struct TombstoneRow {
    /// `id` column.
    pub id: String,
    /// `root_id` column.
    pub root_id: String,
    /// `revision` column (database bigint).
    pub revision: i64,
    /// `deleted_at` column.
    pub deleted_at: DateTime<Utc>,
    /// `deleted_by` column.
    pub deleted_by: String,
}

fn revision_from_column(revision: i64, entity: &'static str) -> ModelResult<Revision> {
    u64::try_from(revision)
        .map(Revision::new)
        .map_err(|_| ModelError::invalid_row(entity, format!("negative revision {revision}")))
}

/// Maps a record row into a [`Record`].
pub fn record_from_row(row: RecordRow) -> ModelResult<Record> {
    let attributes = serde_json::from_str(&row.attributes)
        .map_err(|e| ModelError::invalid_row("record", format!("attributes: {e}")))?;

    Ok(Record {
        id: RecordId::new(row.id),
        root_id: RootId::new(row.root_id),
        record_type: row.record_type,
        attributes,
        state: Bytes::from(row.state),
        revision: revision_from_column(row.revision, "record")?,
        created_at: row.created_at,
        created_by: UserId::new(row.created_by),
        updated_at: row.updated_at,
        updated_by: row.updated_by.map(UserId::new),
    })
}

/// Maps a [`Record`] back into its row form.
pub fn record_to_row(record: &Record) -> ModelResult<RecordRow> {
    let attributes = serde_json::to_string(&record.attributes)
        .map_err(|e| ModelError::invalid_row("record", format!("attributes: {e}")))?;

    Ok(RecordRow {
        id: record.id.as_str().to_string(),
        root_id: record.root_id.as_str().to_string(),
        record_type: record.record_type.clone(),
        attributes,
        state: record.state.to_vec(),
        revision: record.revision.value() as i64,
        created_at: record.created_at,
        created_by: record.created_by.as_str().to_string(),
        updated_at: record.updated_at,
        updated_by: record.updated_by.as_ref().map(|u| u.as_str().to_string()),
    })
}

/// Maps a collaboration row into a [`Collaboration`].
pub fn collaboration_from_row(row: CollaborationRow) -> ModelResult<Collaboration> {
    let role = Role::parse(&row.role).ok_or(ModelError::UnknownRole {
        role: row.role.clone(),
    })?;

    Ok(Collaboration {
        root_id: RootId::new(row.root_id),
        collaborator_id: UserId::new(row.collaborator_id),
        role,
        revision: revision_from_column(row.revision, "collaboration")?,
        deleted_at: row.deleted_at,
    })
}

/// Maps a [`Collaboration`] back into its row form.
pub fn collaboration_to_row(collaboration: &Collaboration) -> CollaborationRow {
    CollaborationRow {
        root_id: collaboration.root_id.as_str().to_string(),
        collaborator_id: collaboration.collaborator_id.as_str().to_string(),
        role: collaboration.role.as_str().to_string(),
        revision: collaboration.revision.value() as i64,
        deleted_at: collaboration.deleted_at,
    }
}

/// Maps a tombstone row into a [`Tombstone`].
pub fn tombstone_from_row(row: TombstoneRow) -> ModelResult<Tombstone> {
    Ok(Tombstone {
        id: RecordId::new(row.id),
        root_id: RootId::new(row.root_id),
        revision: revision_from_column(row.revision, "tombstone")?,
        deleted_at: row.deleted_at,
        deleted_by: UserId::new(row.deleted_by),
    })
}

/// Maps a [`Tombstone`] back into its row form.
pub fn tombstone_to_row(tombstone: &Tombstone) -> TombstoneRow {
    TombstoneRow {
        id: tombstone.id.as_str().to_string(),
        root_id: tombstone.root_id.as_str().to_string(),
        revision: tombstone.revision.value() as i64,
        deleted_at: tombstone.deleted_at,
        deleted_by: tombstone.deleted_by.as_str().to_string(),
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

    fn record_row() -> RecordRow {
        RecordRow {
            id: "rec-1".into(),
            root_id: "root-1".into(),
            record_type: "page".into(),
            attributes: r#"{"title":"hello"}"#.into(),
            state: vec![1, 2, 3],
            revision: 42,
            created_at: at(1_000),
            created_by: "u1".into(),
            updated_at: Some(at(2_000)),
            updated_by: Some("u2".into()),
        }
    }

    #[test]
    fn record_row_roundtrip() {
        let record = record_from_row(record_row()).unwrap();

        assert_eq!(record.id, RecordId::new("rec-1"));
        assert_eq!(record.root_id, RootId::new("root-1"));
        assert_eq!(record.record_type, "page");
        assert_eq!(record.attributes, json!({ "title": "hello" }));
        assert_eq!(record.state.as_ref(), &[1, 2, 3]);
        assert_eq!(record.revision, Revision::new(42));
        assert_eq!(record.created_by, UserId::new("u1"));
        assert_eq!(record.updated_by, Some(UserId::new("u2")));

        let row = record_to_row(&record).unwrap();
        assert_eq!(row.id, "rec-1");
        assert_eq!(row.revision, 42);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&row.attributes).unwrap(),
            json!({ "title": "hello" })
        );
    }

    #[test]
    fn record_row_rejects_bad_attributes() {
        let mut row = record_row();
        row.attributes = "{not json".into();
        assert!(record_from_row(row).is_err());
    }

    #[test]
    fn record_row_rejects_negative_revision() {
        let mut row = record_row();
        row.revision = -1;
        assert!(record_from_row(row).is_err());
    }

    #[test]
    fn collaboration_row_roundtrip() {
        let row = CollaborationRow {
            root_id: "root-1".into(),
            collaborator_id: "u1".into(),
            role: "editor".into(),
            revision: 7,
            deleted_at: None,
        };

        let collab = collaboration_from_row(row.clone()).unwrap();
        assert_eq!(collab.role, Role::Editor);
        assert!(!collab.is_deleted());
        assert_eq!(collaboration_to_row(&collab), row);
    }

    #[test]
    fn collaboration_row_rejects_unknown_role() {
        let row = CollaborationRow {
            root_id: "root-1".into(),
            collaborator_id: "u1".into(),
            role: "owner".into(),
            revision: 7,
            deleted_at: None,
        };
        assert!(matches!(
            collaboration_from_row(row),
            Err(ModelError::UnknownRole { .. })
        ));
    }

    #[test]
    fn tombstone_row_roundtrip() {
        let row = TombstoneRow {
            id: "rec-1".into(),
            root_id: "root-1".into(),
            revision: 55,
            deleted_at: at(3_000),
            deleted_by: "u1".into(),
        };

        let tombstone = tombstone_from_row(row.clone()).unwrap();
        assert_eq!(tombstone.revision, Revision::new(55));
        assert_eq!(tombstone_to_row(&tombstone), row);
    }
}
