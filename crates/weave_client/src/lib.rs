//! # Weave Client
//!
//! Client side of the Weave sync core.
//!
//! This crate provides:
//! - `LocalStore`, the device's replica with quarantine and cascade rules
//! - `MutationOutbox`, redelivery-until-acknowledged for local writes
//! - `Consumer`, the per-subscription pull/apply state machine
//! - `CursorStore`, persisted forward-only cursors
//! - `LiveQueryRegistry`, invalidation of live local queries
//! - `SocketChannel` and its watchdog-driven WebSocket driver
//! - `SyncClient`, the facade tying them together
//!
//! ## Key invariants
//!
//! - Local writes apply immediately and are redelivered until acknowledged
//! - Cursors advance only after a successful local commit
//! - Batches apply in revision order; one bad item never stalls the stream
//! - Sync failures are invisible: the client retries silently

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod consumer;
mod cursors;
mod error;
mod live_query;
mod outbox;
mod socket;
mod store;

pub use client::SyncClient;
pub use config::{BackoffConfig, ClientConfig};
pub use consumer::{Consumer, ConsumerStatus};
pub use cursors::{CursorStore, MemoryCursorStore};
pub use error::{ClientError, ClientResult};
pub use live_query::{LiveQueryRegistry, QueryId};
pub use outbox::{MutationOutbox, OutboxEntry};
pub use socket::{
    spawn_socket, ChannelState, SocketChannel, SocketHandle, SocketIdProvider, TickAction,
};
pub use store::LocalStore;
