//! The page table: logical page id → atomic chain-head address.
//!
//! A fixed, zero-initialized array of 64-bit atomic slots. Each slot holds
//! the address of a page's delta-chain head, or 0 while the page is
//! unmapped. The slot CAS in [`PageTable::update`] is the sole
//! cross-component synchronization point of the engine.
//!
//! Out-of-range page ids are a programming error and panic; callers that
//! accept ids from the outside validate against [`PageTable::capacity`]
//! first.

use std::sync::atomic::AtomicU64;

use crate::PageId;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};

/// Slot value for an unmapped page.
pub const UNMAPPED: u64 = 0;

/// Fixed-capacity mapping from logical page id to chain-head address.
#[derive(Debug)]
pub struct PageTable {
    slots: Box<[AtomicU64]>,
    /// Next logical page id to hand out. Id 0 is the reserved root.
    next_id: AtomicU64,
}

impl PageTable {
    /// Create a table with `capacity` slots, all unmapped.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let slots: Vec<AtomicU64> = (0..capacity).map(|_| AtomicU64::new(UNMAPPED)).collect();
        Self {
            slots: slots.into_boxed_slice(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of slots. Fixed at construction; the table does not resize.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Load the head address stored for `id` (Acquire).
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside `0..capacity`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PageId) -> u64 {
        self.slot(id).load(READ_ORD)
    }

    /// Unconditionally publish `value` for `id` (Release).
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside `0..capacity`.
    #[inline]
    pub fn set(&self, id: PageId, value: u64) {
        self.slot(id).store(value, WRITE_ORD);
    }

    /// CAS the slot for `id` from `expected` to `desired`.
    ///
    /// Succeeds with AcqRel ordering; on failure the observed current value
    /// is returned so a retry loop can proceed without a second load.
    ///
    /// # Errors
    ///
    /// Returns the observed slot value when it differs from `expected`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside `0..capacity`.
    #[inline]
    pub fn update(&self, id: PageId, expected: u64, desired: u64) -> Result<(), u64> {
        self.slot(id)
            .compare_exchange(expected, desired, CAS_SUCCESS, CAS_FAILURE)
            .map(|_| ())
    }

    /// Allocate the next dense logical page id.
    ///
    /// Returns `None` once the id space has grown past the slot capacity.
    /// Ids are handed out monotonically and never reused.
    pub fn allocate_id(&self) -> Option<PageId> {
        let id: u64 = self.next_id.fetch_add(1, RELAXED);
        (id < self.slots.len() as u64).then_some(id)
    }

    // Out-of-range access is a programming error, not a recoverable one.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn slot(&self, id: PageId) -> &AtomicU64 {
        &self.slots[id as usize]
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_unmapped() {
        let table = PageTable::with_capacity(8);
        assert_eq!(table.capacity(), 8);
        for id in 0..8 {
            assert_eq!(table.get(id), UNMAPPED);
        }
    }

    /// Page-table identity: `set` then `get` returns the stored value.
    #[test]
    fn test_set_get_identity() {
        let table = PageTable::with_capacity(4);
        table.set(0, 0xDEAD);
        table.set(3, 0xBEEF);

        assert_eq!(table.get(0), 0xDEAD);
        assert_eq!(table.get(3), 0xBEEF);
        assert_eq!(table.get(1), UNMAPPED);
    }

    /// CAS semantics: mutate iff the slot equals `expected`; unchanged and
    /// observed-value reported otherwise.
    #[test]
    fn test_update_cas_semantics() {
        let table = PageTable::with_capacity(4);
        table.set(1, 10);

        assert_eq!(table.update(1, 10, 20), Ok(()));
        assert_eq!(table.get(1), 20);

        // Stale expectation fails and reports the current value.
        assert_eq!(table.update(1, 10, 30), Err(20));
        assert_eq!(table.get(1), 20);
    }

    #[test]
    fn test_update_from_unmapped() {
        let table = PageTable::with_capacity(4);
        assert_eq!(table.update(2, UNMAPPED, 99), Ok(()));
        assert_eq!(table.get(2), 99);
    }

    #[test]
    fn test_allocate_id_is_dense_and_bounded() {
        let table = PageTable::with_capacity(4);
        assert_eq!(table.allocate_id(), Some(1));
        assert_eq!(table.allocate_id(), Some(2));
        assert_eq!(table.allocate_id(), Some(3));
        // Id space exhausted; ids are never reused.
        assert_eq!(table.allocate_id(), None);
        assert_eq!(table.allocate_id(), None);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_out_of_range_id_panics() {
        let table = PageTable::with_capacity(4);
        let _ = table.get(4);
    }
}
