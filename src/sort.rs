//! Deterministic ordering of Implementation candidates.

use std::cmp::Ordering;

use semver::Version;

use crate::types::ImplementationRevision;

/// Sorts by path ascending, then by revision descending.
///
/// Revisions are compared as semantic versions when both parse, otherwise as
/// plain strings. Candidates without metadata sort last. The sort is stable.
pub fn sort_implementation_revisions(revs: &mut [ImplementationRevision]) {
    revs.sort_by(compare_implementation_revisions);
}

fn compare_implementation_revisions(a: &ImplementationRevision, b: &ImplementationRevision) -> Ordering {
    match (a.path(), b.path()) {
        (Some(pa), Some(pb)) => pa.cmp(pb).then_with(|| compare_revisions(&b.revision, &a.revision)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Compares two revision strings, semver-aware.
#[must_use]
pub fn compare_revisions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}
