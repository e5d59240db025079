//! The CRDT seam and the default last-writer-wins document.
//!
//! The sync core treats the CRDT library as an external collaborator
//! behind the narrow [`Crdt`] trait. [`LwwCrdt`] is the in-tree
//! implementation: a field-wise last-writer-wins document whose merge is a
//! join-semilattice, which makes it commutative, associative and
//! idempotent by construction.

use crate::error::{ModelError, ModelResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Merge-capable document operations.
///
/// Implementations must guarantee that `apply_update` is commutative,
/// associative and idempotent, and that `decode` is a pure function of the
/// state blob.
pub trait Crdt: Send + Sync {
    /// Merges an update into a state blob, returning the new state.
    ///
    /// An empty `state` is the empty document, so a full state blob is
    /// itself a valid update.
    fn apply_update(&self, state: &[u8], update: &[u8]) -> ModelResult<Bytes>;

    /// Decodes a state blob into its attribute snapshot.
    fn decode(&self, state: &[u8]) -> ModelResult<Value>;

    /// Computes the minimal update that carries `new` beyond `old`.
    fn diff(&self, old: &[u8], new: &[u8]) -> ModelResult<Bytes>;
}

/// One field entry in a [`LwwDoc`].
///
/// Entries are totally ordered by `(clock, actor)`; a given pair must
/// never map to two different values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwEntry {
    /// Logical clock of the write.
    pub clock: u64,
    /// Writing actor, the tie-breaker between concurrent clocks.
    pub actor: String,
    /// The written value.
    pub value: Value,
}

impl LwwEntry {
    fn beats(&self, other: &LwwEntry) -> bool {
        (self.clock, &self.actor) > (other.clock, &other.actor)
    }
}

/// A field-wise last-writer-wins document.
///
/// Serialized as CBOR; the encoded form is the opaque state blob the rest
/// of the system carries around. A document is also its own update format:
/// `diff` produces a sub-document and `apply_update` merges one in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwDoc {
    fields: BTreeMap<String, LwwEntry>,
}

impl LwwDoc {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, unconditionally taking the given write.
    pub fn set(&mut self, field: impl Into<String>, value: Value, clock: u64, actor: impl Into<String>) {
        self.fields.insert(
            field.into(),
            LwwEntry {
                clock,
                actor: actor.into(),
                value,
            },
        );
    }

    /// Merges another document into this one, field-wise LWW.
    pub fn merge(&mut self, other: &LwwDoc) {
        for (field, entry) in &other.fields {
            match self.fields.get(field) {
                Some(current) if !entry.beats(current) => {}
                _ => {
                    self.fields.insert(field.clone(), entry.clone());
                }
            }
        }
    }

    /// Returns the sub-document of entries in `self` not yet reflected in
    /// `base`.
    pub fn diff_from(&self, base: &LwwDoc) -> LwwDoc {
        let mut out = LwwDoc::new();
        for (field, entry) in &self.fields {
            let newer = match base.fields.get(field) {
                Some(existing) => entry.beats(existing),
                None => true,
            };
            if newer {
                out.fields.insert(field.clone(), entry.clone());
            }
        }
        out
    }

    /// Returns the attribute snapshot: one JSON object with the winning
    /// value per field.
    pub fn snapshot(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(field, entry)| (field.clone(), entry.value.clone()))
            .collect();
        Value::Object(map)
    }

    /// Returns the highest clock present in the document.
    pub fn max_clock(&self) -> u64 {
        self.fields.values().map(|e| e.clock).max().unwrap_or(0)
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the document as a CBOR state blob.
    pub fn encode(&self) -> ModelResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| ModelError::EncodeFailed {
            reason: e.to_string(),
        })?;
        Ok(Bytes::from(buf))
    }

    /// Decodes a CBOR state blob; an empty slice is the empty document.
    pub fn decode(bytes: &[u8]) -> ModelResult<LwwDoc> {
        if bytes.is_empty() {
            return Ok(LwwDoc::new());
        }
        ciborium::de::from_reader(bytes).map_err(|e| ModelError::corrupt(e.to_string()))
    }
}

/// The default [`Crdt`] implementation over [`LwwDoc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LwwCrdt;

impl LwwCrdt {
    /// Creates the default CRDT.
    pub fn new() -> Self {
        Self
    }
}

impl Crdt for LwwCrdt {
    fn apply_update(&self, state: &[u8], update: &[u8]) -> ModelResult<Bytes> {
        let mut doc = LwwDoc::decode(state)?;
        let incoming = LwwDoc::decode(update)?;
        doc.merge(&incoming);
        doc.encode()
    }

    fn decode(&self, state: &[u8]) -> ModelResult<Value> {
        Ok(LwwDoc::decode(state)?.snapshot())
    }

    fn diff(&self, old: &[u8], new: &[u8]) -> ModelResult<Bytes> {
        let old_doc = LwwDoc::decode(old)?;
        let new_doc = LwwDoc::decode(new)?;
        new_doc.diff_from(&old_doc).encode()
    }
}
