//! # Weave Testkit
//!
//! Shared test tooling for the Weave sync core.
//!
//! This crate provides:
//! - `fixtures`: builders for records, items and mutations, plus an
//!   in-memory client↔server loopback harness
//! - `generators`: proptest strategies for documents and batches
//! - `crash`: fault injection at item boundaries
//!
//! Everything here is test support; nothing ships in production builds.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
