//! The revision cursor primitive.

use crate::error::ModelError;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A server-assigned monotonic revision.
///
/// Revisions are the sole ordering and cursor primitive: strictly
/// increasing per table, never reused, and treated as opaque by everything
/// except the sequencer that assigns them. Gaps are permitted and carry no
/// meaning.
///
/// On the wire a revision is a decimal string, never a JSON number, so the
/// full 64-bit range survives transports with 53-bit number precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(u64);

impl Revision {
    /// The zero revision: "nothing applied yet", requesting a full resync.
    pub const ZERO: Revision = Revision(0);

    /// Creates a revision from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the zero (full resync) revision.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Revision)
            .map_err(|_| ModelError::InvalidRevision { value: s.into() })
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct RevisionVisitor;

impl Visitor<'_> for RevisionVisitor {
    type Value = Revision;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal string holding a 64-bit revision")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Revision, E> {
        v.parse().map_err(|_| E::custom("invalid revision string"))
    }

    // Tolerated for non-JSON encodings that carry integers natively.
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Revision, E> {
        Ok(Revision(v))
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RevisionVisitor)
    }
}
