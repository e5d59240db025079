//! Identifier types and the dataset enumeration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a synchronized record.
///
/// Generated ids are prefixed with the creation time in milliseconds so
/// that lexicographic order matches creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

/// Identifier of a collaboration root (the subtree grouping key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(String);

/// Identifier of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

fn sortable_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    format!("{millis:012x}{}", Uuid::new_v4().simple())
}

impl RecordId {
    /// Creates an id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new sortable id.
    pub fn generate() -> Self {
        Self(sortable_id())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RootId {
    /// Creates an id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new sortable id.
    pub fn generate() -> Self {
        Self(sortable_id())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    /// Creates an id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new sortable id.
    pub fn generate() -> Self {
        Self(sortable_id())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&RecordId> for RootId {
    fn from(id: &RecordId) -> Self {
        RootId(id.0.clone())
    }
}

/// A synchronized dataset (one server table with its own revision space).
///
/// Adding a dataset is a compile-time change: every match over this enum
/// is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Synchronized records (pages, messages, files, ...).
    Records,
    /// Role grants per root.
    Collaborations,
    /// Deletion markers.
    Tombstones,
    /// Per-user read state.
    Interactions,
    /// Per-user reactions.
    Reactions,
}

impl Dataset {
    /// All datasets, in subscription order.
    pub const ALL: [Dataset; 5] = [
        Dataset::Records,
        Dataset::Collaborations,
        Dataset::Tombstones,
        Dataset::Interactions,
        Dataset::Reactions,
    ];

    /// Returns the dataset's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Records => "records",
            Dataset::Collaborations => "collaborations",
            Dataset::Tombstones => "tombstones",
            Dataset::Interactions => "interactions",
            Dataset::Reactions => "reactions",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_sort_by_creation() {
        let a = RecordId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RecordId::generate();
        assert!(a < b);
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = RecordId::new("rec-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"rec-1\"");

        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn dataset_names() {
        assert_eq!(Dataset::Records.as_str(), "records");
        assert_eq!(Dataset::Collaborations.as_str(), "collaborations");
        assert_eq!(Dataset::ALL.len(), 5);
    }
}
