//! Identity diffing between two snapshots' entity collections
//!
//! All structural reconciliation starts from an id-set comparison; entities
//! are never matched by position or content. Membership in `kept` says
//! nothing about field equality, callers still compare field by field.

use std::collections::HashSet;
use std::hash::Hash;

/// Result of diffing two id sets. The three sets are pairwise disjoint.
#[derive(Debug, Clone)]
pub struct IdDiff<I> {
    /// Present in the new set only.
    pub added: HashSet<I>,
    /// Present in the old set only.
    pub removed: HashSet<I>,
    /// Present in both; fields may still differ.
    pub kept: HashSet<I>,
}

/// Compute `added`/`removed`/`kept` between two id collections.
///
/// Pure, O(n) in the combined size. No iteration order is guaranteed on the
/// returned sets; presentation order comes from position fields, not from
/// here.
pub fn diff_ids<I>(old: impl IntoIterator<Item = I>, new: impl IntoIterator<Item = I>) -> IdDiff<I>
where
    I: Copy + Eq + Hash,
{
    let old: HashSet<I> = old.into_iter().collect();
    let new: HashSet<I> = new.into_iter().collect();
    IdDiff {
        added: new.difference(&old).copied().collect(),
        removed: old.difference(&new).copied().collect(),
        kept: old.intersection(&new).copied().collect(),
    }
}
