//! Deduplication of a jam's road segments across observations.

use std::collections::HashSet;

use crate::snapshot::Segment;

/// Appends the segments of `incoming` whose `ID` is not yet known.
///
/// Existing order is preserved and additions keep their relative order. A
/// segment whose `ID` is already present is never appended again, even if its
/// other fields differ; this also applies to repeats inside `incoming`.
/// Returns the merged list and the number of segments added.
pub fn merge(existing: &[Segment], incoming: &[Segment]) -> (Vec<Segment>, usize) {
    let mut seen: HashSet<Option<i64>> = existing.iter().map(|s| s.id).collect();
    let mut merged = existing.to_vec();

    for segment in incoming {
        if seen.insert(segment.id) {
            merged.push(segment.clone());
        }
    }

    let added = merged.len() - existing.len();
    (merged, added)
}
