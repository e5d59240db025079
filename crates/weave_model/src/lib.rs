//! # Weave Model
//!
//! Domain model for the Weave sync core.
//!
//! This crate provides:
//! - Identifier newtypes and the `Revision` cursor primitive
//! - Record, Collaboration, Tombstone, Interaction and Reaction types
//! - The `Crdt` seam (`apply_update`, `decode`, `diff`) with a
//!   last-writer-wins default implementation
//! - The per-record `StateStore` with corruption quarantine
//! - Explicit row ↔ domain mapper functions
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crdt;
mod error;
mod mapper;
mod record;
mod revision;
mod store;
mod types;

pub use crdt::{Crdt, LwwCrdt, LwwDoc, LwwEntry};
pub use error::{ModelError, ModelResult};
pub use mapper::{
    collaboration_from_row, collaboration_to_row, record_from_row, record_to_row,
    tombstone_from_row, tombstone_to_row, CollaborationRow, RecordRow, TombstoneRow,
};
pub use record::{Collaboration, Interaction, Reaction, Record, Role, Tombstone};
pub use revision::Revision;
pub use store::{DocState, StateStore};
pub use types::{Dataset, RecordId, RootId, UserId};
