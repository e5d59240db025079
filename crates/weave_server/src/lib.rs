//! # Weave Server
//!
//! Server side of the Weave sync core.
//!
//! This crate provides:
//! - `RevisionSequencer`, the per-dataset revision assigner
//! - `ServerStore`, the synchronized tables with revision-ordered scans
//! - `MutationHandler`, per-mutation authorization and application
//! - `Synchronizer`, the per-subscription push state machine
//! - `Session`, per-connection routing of messages and events
//! - `SocketServer` and `SocketRegistry`, the WebSocket transport
//!
//! ## Key invariants
//!
//! - Revisions strictly increase per dataset and are never reused
//! - Batches are served in ascending revision order
//! - A consumer's cursor is always trusted on re-subscribe
//! - Deletions are tombstoned, never silently dropped

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod mutations;
mod sequencer;
mod session;
mod socket;
mod store;
mod synchronizer;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use mutations::MutationHandler;
pub use sequencer::RevisionSequencer;
pub use session::Session;
pub use socket::{SocketRegistry, SocketServer};
pub use store::ServerStore;
pub use synchronizer::{Synchronizer, SynchronizerStatus};
