//! # Weave Protocol
//!
//! Wire types for the Weave sync protocol.
//!
//! Every frame on the socket is a JSON object with a `type` discriminator.
//! Each direction is a closed tagged union ([`ClientMessage`],
//! [`ServerMessage`]) so adding a dataset or message is a compile-time
//! checked change. Revisions cross the wire as decimal strings; CRDT blobs
//! cross base64-encoded.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod items;
mod messages;
mod mutation;

pub use items::{
    CollaborationItem, InteractionItem, ReactionItem, RecordItem, TombstoneItem,
};
pub use messages::{ClientMessage, ServerMessage};
pub use mutation::{
    Mutation, MutationKind, MutationRequest, MutationResponse, MutationResult, MutationStatus,
};
