//! # Weave Bus
//!
//! Publish/subscribe plumbing for the Weave sync core.
//!
//! This crate provides:
//! - [`Event`], the closed set of change notifications
//! - [`EventBus`], synchronous in-process pub/sub
//! - [`BroadcastBridge`], the cross-process extension with origin-host
//!   filtering
//!
//! Buses and bridges are explicit constructed services passed by handle;
//! their lifecycle (`init`/`dispose`) belongs to the process bootstrap.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod bus;
mod event;

pub use bridge::{BroadcastBridge, HostId, RelayedEvent};
pub use bus::{EventBus, EventPublisher, SubscriptionId};
pub use event::Event;
