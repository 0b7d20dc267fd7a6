//! Position index: ordered views over position-carrying collections
//!
//! The index is rebuilt from the entity store on every use rather than
//! maintained incrementally, so it cannot drift from the authoritative
//! positions.

/// Ascending `(id, position)` sequence from an unordered collection.
///
/// Ties on position break by id, so the sequence stays deterministic during
/// the transient windows where duplicate positions exist mid-merge.
pub fn ordered<I>(entries: impl IntoIterator<Item = (I, i64)>) -> Vec<(I, i64)>
where
    I: Copy + Ord,
{
    let mut seq: Vec<(I, i64)> = entries.into_iter().collect();
    seq.sort_by_key(|&(id, position)| (position, id));
    seq
}

/// Resolve the insertion anchor for a target position.
///
/// Returns the id of the first entity with `position >= target`: the new
/// entity goes immediately before it. `None` means append at the end.
/// First match wins, so boundary ties resolve deterministically.
pub fn insertion_anchor<I: Copy>(sequence: &[(I, i64)], target: i64) -> Option<I> {
    sequence
        .iter()
        .find(|&&(_, position)| position >= target)
        .map(|&(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_sorts_by_position() {
        let seq = ordered([(3u64, 20), (1, 0), (2, 10)]);
        assert_eq!(seq, vec![(1, 0), (2, 10), (3, 20)]);
    }

    #[test]
    fn test_ordered_breaks_ties_by_id() {
        let seq = ordered([(9u64, 5), (4, 5), (7, 5)]);
        assert_eq!(seq, vec![(4, 5), (7, 5), (9, 5)]);
    }

    #[test]
    fn test_anchor_before_first_geq() {
        let seq = ordered([(1u64, 0), (2, 10), (3, 20)]);
        assert_eq!(insertion_anchor(&seq, 5), Some(2));
        assert_eq!(insertion_anchor(&seq, 10), Some(2));
        assert_eq!(insertion_anchor(&seq, 0), Some(1));
    }

    #[test]
    fn test_anchor_append_when_past_end() {
        let seq = ordered([(1u64, 0), (2, 10)]);
        assert_eq!(insertion_anchor(&seq, 11), None);
    }

    #[test]
    fn test_anchor_on_empty_sequence() {
        let seq: Vec<(u64, i64)> = vec![];
        assert_eq!(insertion_anchor(&seq, 0), None);
    }
}
