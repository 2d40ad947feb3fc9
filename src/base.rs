//! Sorted base nodes: the compact snapshot terminating a delta chain.

use crate::ksearch;
use crate::{Key, Value};

/// An ordered sequence of key/value pairs with strictly ascending keys.
///
/// A base node is immutable after construction; consolidation builds a fresh
/// one rather than editing in place. Keys live in their own contiguous array
/// so the lower-bound search can run vectorized over them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BaseNode {
    keys: Vec<Key>,
    values: Vec<Value>,
}

impl BaseNode {
    /// An empty base node (count 0). Distinct from an unmapped page: the
    /// chain terminates here instead of at the null address.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from entries already sorted by strictly ascending key.
    ///
    /// Callers produce entries from an ordered map, so ascending order is a
    /// structural given; it is re-checked in debug builds only.
    #[must_use]
    pub fn from_sorted(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        let mut keys: Vec<Key> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for (key, value) in entries {
            debug_assert!(
                keys.last().is_none_or(|&last| last < key),
                "base node keys must be strictly ascending"
            );
            keys.push(key);
            values.push(value);
        }

        Self { keys, values }
    }

    /// Number of present entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True iff the node holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The sorted key array.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Look up `key` via lower-bound search.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<Value> {
        let idx: usize = ksearch::lower_bound(&self.keys, key);
        match self.keys.get(idx) {
            Some(&k) if k == key => self.values.get(idx).copied(),
            _ => None,
        }
    }

    /// Iterate entries in ascending key order.
    pub fn entries(&self) -> impl Iterator<Item = (Key, Value)> + '_ {
        self.keys
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_node() {
        let base = BaseNode::empty();
        assert_eq!(base.len(), 0);
        assert!(base.is_empty());
        assert_eq!(base.get(0), None);
    }

    #[test]
    fn test_from_sorted_and_get() {
        let base = BaseNode::from_sorted([(-5, 50), (0, 0), (7, 70)]);
        assert_eq!(base.len(), 3);
        assert_eq!(base.get(-5), Some(50));
        assert_eq!(base.get(0), Some(0));
        assert_eq!(base.get(7), Some(70));
        assert_eq!(base.get(1), None);
        assert_eq!(base.get(100), None);
    }

    #[test]
    fn test_entries_are_ordered() {
        let base = BaseNode::from_sorted([(1, 10), (2, 20), (3, 30)]);
        let collected: Vec<(i64, u64)> = base.entries().collect();
        assert_eq!(collected, vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "strictly ascending")]
    fn test_unsorted_input_is_rejected() {
        let _ = BaseNode::from_sorted([(2, 0), (1, 0)]);
    }
}
