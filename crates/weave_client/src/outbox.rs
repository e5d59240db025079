//! The mutation outbox.

use std::collections::VecDeque;
use tracing::debug;
use weave_protocol::{Mutation, MutationResult};

/// An entry in the outbox.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// The queued mutation.
    pub mutation: Mutation,
    /// Whether the server has acknowledged it.
    pub acknowledged: bool,
}

impl OutboxEntry {
    fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            acknowledged: false,
        }
    }
}

/// Queue of locally applied mutations awaiting server acknowledgement.
///
/// Local writes land here after their optimistic apply and are redelivered
/// until the server answers with a terminal status. A retriable status
/// (`INTERNAL_ERROR`) leaves the entry pending; terminal statuses mark it
/// acknowledged, and [`MutationOutbox::compact`] drops the acknowledged
/// prefix.
///
/// # Invariants
///
/// - Entries stay in enqueue order; batches preserve it
/// - An entry leaves the queue only through a terminal status
#[derive(Debug, Default)]
pub struct MutationOutbox {
    entries: VecDeque<OutboxEntry>,
}

impl MutationOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a mutation for delivery.
    pub fn enqueue(&mut self, mutation: Mutation) {
        self.entries.push_back(OutboxEntry::new(mutation));
    }

    /// Returns the next batch of pending mutations, oldest first.
    pub fn pending_batch(&self, limit: usize) -> Vec<Mutation> {
        self.entries
            .iter()
            .filter(|e| !e.acknowledged)
            .take(limit)
            .map(|e| e.mutation.clone())
            .collect()
    }

    /// Returns the number of pending mutations.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.acknowledged).count()
    }

    /// Applies server results: terminal statuses acknowledge their entry,
    /// retriable ones leave it pending. Returns the number acknowledged.
    pub fn acknowledge(&mut self, results: &[MutationResult]) -> usize {
        let mut acknowledged = 0;
        for result in results {
            if !result.status.is_terminal() {
                debug!(mutation = %result.id, status = ?result.status, "mutation stays pending");
                continue;
            }
            for entry in &mut self.entries {
                if entry.mutation.id == result.id && !entry.acknowledged {
                    entry.acknowledged = true;
                    acknowledged += 1;
                    break;
                }
            }
        }
        acknowledged
    }

    /// Drops acknowledged entries from the front of the queue.
    pub fn compact(&mut self) {
        while let Some(entry) = self.entries.front() {
            if entry.acknowledged {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the outbox holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
