//! Revision assignment.

use parking_lot::Mutex;
use std::collections::HashMap;
use weave_model::{Dataset, Revision};

/// Assigns revisions to row writes.
///
/// Each dataset has its own counter. Assigned revisions are unique and
/// strictly increasing per dataset; gaps are permitted and carry no
/// meaning, so consumers must treat revisions as opaque cursors, never as
/// counts.
///
/// This is the sole serialization point for the shared tables.
#[derive(Debug, Default)]
pub struct RevisionSequencer {
    counters: Mutex<HashMap<Dataset, u64>>,
}

impl RevisionSequencer {
    /// Creates a sequencer with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next revision for a dataset.
    pub fn next(&self, dataset: Dataset) -> Revision {
        let mut counters = self.counters.lock();
        let counter = counters.entry(dataset).or_insert(0);
        *counter += 1;
        Revision::new(*counter)
    }

    /// Returns the highest revision assigned so far for a dataset.
    pub fn current(&self, dataset: Dataset) -> Revision {
        Revision::new(*self.counters.lock().get(&dataset).unwrap_or(&0))
    }

    /// Burns `count` revisions, leaving a gap.
    ///
    /// Gaps occur naturally in production (rolled-back transactions); this
    /// lets tests exercise the same shape.
    pub fn skip(&self, dataset: Dataset, count: u64) {
        let mut counters = self.counters.lock();
        *counters.entry(dataset).or_insert(0) += count;
    }
}
