//! Proptest strategies for documents and batches.

use crate::fixtures::record_item;
use proptest::prelude::*;
use serde_json::json;
use weave_model::LwwDoc;
use weave_protocol::RecordItem;

/// Field names used by generated documents.
pub const FIELDS: [&str; 3] = ["title", "body", "tag"];

/// Actor names used by generated documents.
pub const ACTORS: [&str; 3] = ["alice", "bob", "carol"];

/// A single-entry update document.
///
/// The value is a function of `(clock, actor)`, so two generated updates
/// never disagree on the value for the same write, which is the invariant
/// real actors uphold.
pub fn update_strategy() -> impl Strategy<Value = LwwDoc> {
    (0usize..FIELDS.len(), 0u64..16, 0usize..ACTORS.len()).prop_map(|(field, clock, actor)| {
        let mut doc = LwwDoc::new();
        doc.set(
            FIELDS[field],
            json!(format!("{}-{}", clock, ACTORS[actor])),
            clock,
            ACTORS[actor],
        );
        doc
    })
}

/// A sequence of update documents.
pub fn update_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<LwwDoc>> {
    prop::collection::vec(update_strategy(), 1..=max_len)
}

/// A batch of record items for one root, with strictly increasing
/// revisions starting at `first_revision`.
pub fn record_batch_strategy(
    root: &'static str,
    first_revision: u64,
    max_len: usize,
) -> impl Strategy<Value = Vec<RecordItem>> {
    prop::collection::vec((update_strategy(), 0usize..4), 1..=max_len).prop_map(
        move |entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, (doc, record))| {
                    record_item(
                        &format!("rec-{record}"),
                        root,
                        first_revision + index as u64,
                        doc.encode().expect("encoding a fresh document cannot fail"),
                    )
                })
                .collect()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_batches_have_increasing_revisions(
            batch in record_batch_strategy("root-1", 100, 8)
        ) {
            for pair in batch.windows(2) {
                prop_assert!(pair[0].revision < pair[1].revision);
            }
        }

        #[test]
        fn generated_updates_encode(doc in update_strategy()) {
            let blob = doc.encode().unwrap();
            prop_assert_eq!(LwwDoc::decode(&blob).unwrap(), doc);
        }
    }
}
