//! The index façade: Insert / Lookup / Delete / Range-Scan / Consolidate /
//! Collect over a single-root delta-chain engine.
//!
//! # Write protocol
//!
//! ```text
//! 1. Allocate an unlinked delta record
//! 2. Load the chain head from the page-table slot (Acquire)
//! 3. Point the record's next link at the observed head
//! 4. CAS the slot from the observed head to the record's address
//! 5. On conflict: backoff step, reload the head, repeat from (3)
//!    until the retry cap; on success: maybe consolidate, maybe
//!    advance the epoch and collect
//! ```
//!
//! The CAS's acquire-release ordering makes the record's field writes
//! visible to any subsequent acquire-loader of the slot. A record rejected
//! by the CAS is still exclusively owned by the writer and is dropped
//! immediately, so a failed write leaves no trace.
//!
//! # Read protocol
//!
//! Every read-visible operation pins the epoch for its full duration and
//! walks the chain newest-to-oldest with first-match-wins semantics. The
//! guard is released on all exit paths. Readers in flight during a
//! consolidation swing continue on the old chain (kept alive by their pin)
//! and observe the new base on their next slot load.
//!
//! # Duplicate keys
//!
//! Repeated inserts of one key never overwrite in place; the newest delta
//! wins at read time and the next consolidation deduplicates.

mod consolidate;

use std::fmt;
use std::sync::atomic::AtomicU64;

use crate::backoff::SpinBackoff;
use crate::config::IndexConfig;
use crate::delta::{self, DeltaOp, PageNode, StructuralHint, NULL_ADDR};
use crate::epoch::{EpochManager, Guard};
use crate::ordering::RELAXED;
use crate::page_table::PageTable;
use crate::tracing_helpers::{trace_log, warn_log};
use crate::{Key, PageId, Value, ROOT_PAGE_ID};

/// Writer operations between global-epoch advances.
const EPOCH_ADVANCE_INTERVAL: u64 = 64;

// ============================================================================
//  IndexError
// ============================================================================

/// Errors reported by façade operations.
///
/// Intentionally few: errors are local, and nothing is retried by the
/// engine beyond the bounded CAS loop. The caller owns policy above that
/// floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// The CAS retry cap was exhausted under sustained contention.
    RetriesExhausted,

    /// The operation targeted a page whose slot is unmapped.
    PageUnmapped(PageId),

    /// Another writer changed the chain head during consolidation; the
    /// candidate base node was discarded. The caller may retry.
    ConsolidationSuperseded,

    /// The chain carries a Split or Merge delta. This single-node engine
    /// surfaces the redirect instead of misapplying it as a data delta.
    NeedsStructuralHandling(StructuralHint),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "CAS retry cap exhausted under contention"),

            Self::PageUnmapped(page) => write!(f, "page {page} is unmapped"),

            Self::ConsolidationSuperseded => {
                write!(f, "consolidation superseded by a concurrent writer")
            }

            Self::NeedsStructuralHandling(hint) => {
                write!(f, "chain requires tree-structural handling: {hint:?}")
            }
        }
    }
}

impl std::error::Error for IndexError {}

// ============================================================================
//  BwTree
// ============================================================================

/// A latch-free ordered index over a single logical root page.
///
/// All operations take `&self` and may run from any number of threads
/// concurrently. Writers publish immutable delta records via slot CAS;
/// readers pin an epoch and walk the chain lock-free.
///
/// # Example
///
/// ```
/// use bwtree::BwTree;
///
/// let tree = BwTree::new();
/// tree.insert(42, 100).unwrap();
/// assert_eq!(tree.lookup(42).unwrap(), Some(100));
///
/// tree.delete(42).unwrap();
/// assert_eq!(tree.lookup(42).unwrap(), None);
/// ```
pub struct BwTree {
    config: IndexConfig,
    pages: PageTable,
    epoch: EpochManager,
    /// Writer-operation counter driving periodic epoch advancement.
    write_ops: AtomicU64,
}

impl BwTree {
    /// Create an index with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(IndexConfig::default())
    }

    /// Create an index with an explicit configuration.
    ///
    /// `page_table_capacity` must be at least 1 to hold the root slot.
    #[must_use]
    pub fn with_config(config: IndexConfig) -> Self {
        debug_assert!(
            config.page_table_capacity >= 1,
            "page table must hold at least the root slot"
        );

        let pages = PageTable::with_capacity(config.page_table_capacity);
        let epoch = EpochManager::with_batch(config.garbage_batch_size);

        Self {
            config,
            pages,
            epoch,
            write_ops: AtomicU64::new(0),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The reclamation domain backing this index.
    #[must_use]
    pub fn epoch_manager(&self) -> &EpochManager {
        &self.epoch
    }

    /// Pin the epoch for a batch of `*_with_guard` operations.
    #[must_use]
    pub fn guard(&self) -> Guard {
        self.epoch.pin()
    }

    // ------------------------------------------------------------------------
    //  Writes
    // ------------------------------------------------------------------------

    /// Insert `key → value` by appending an Insert delta to the root chain.
    ///
    /// # Errors
    ///
    /// [`IndexError::RetriesExhausted`] when the CAS retry cap is reached
    /// under sustained contention.
    pub fn insert(&self, key: Key, value: Value) -> Result<(), IndexError> {
        let guard = self.guard();
        self.insert_with_guard(key, value, &guard)
    }

    /// [`BwTree::insert`] under a caller-held epoch pin.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::insert`].
    pub fn insert_with_guard(
        &self,
        key: Key,
        value: Value,
        guard: &Guard,
    ) -> Result<(), IndexError> {
        self.append_delta(ROOT_PAGE_ID, DeltaOp::Insert { key, value }, guard)
    }

    /// Remove `key` by appending a Delete tombstone to the root chain.
    ///
    /// Deleting an absent key succeeds; the tombstone simply shadows
    /// nothing and is dropped by the next consolidation.
    ///
    /// # Errors
    ///
    /// [`IndexError::RetriesExhausted`] when the CAS retry cap is reached
    /// under sustained contention.
    pub fn delete(&self, key: Key) -> Result<(), IndexError> {
        let guard = self.guard();
        self.delete_with_guard(key, &guard)
    }

    /// [`BwTree::delete`] under a caller-held epoch pin.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::delete`].
    pub fn delete_with_guard(&self, key: Key, guard: &Guard) -> Result<(), IndexError> {
        self.append_delta(ROOT_PAGE_ID, DeltaOp::Delete { key }, guard)
    }

    // ------------------------------------------------------------------------
    //  Reads
    // ------------------------------------------------------------------------

    /// Look up the newest outcome for `key`.
    ///
    /// Returns `Ok(None)` when the newest delta for `key` is a tombstone or
    /// the key is absent altogether.
    ///
    /// # Errors
    ///
    /// [`IndexError::NeedsStructuralHandling`] if the chain carries a Split
    /// or Merge delta covering `key`. The public single-root API never
    /// publishes one, so lookups through this façade do not fail.
    pub fn lookup(&self, key: Key) -> Result<Option<Value>, IndexError> {
        let guard = self.guard();
        self.lookup_with_guard(key, &guard)
    }

    /// [`BwTree::lookup`] under a caller-held epoch pin.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::lookup`].
    pub fn lookup_with_guard(
        &self,
        key: Key,
        _guard: &Guard,
    ) -> Result<Option<Value>, IndexError> {
        let head: u64 = self.pages.get(ROOT_PAGE_ID);

        // SAFETY: `head` was loaded while `_guard` pins the epoch, so every
        // link of the observed chain outlives this walk.
        unsafe { delta::resolve_key(head, key) }.map_err(IndexError::NeedsStructuralHandling)
    }

    /// Ordered scan of `lo <= key < hi`, each key decided by its newest
    /// delta. An empty or inverted range yields an empty sequence.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::lookup`].
    pub fn scan(&self, lo: Key, hi: Key) -> Result<Vec<(Key, Value)>, IndexError> {
        let guard = self.guard();
        self.scan_with_guard(lo, hi, &guard)
    }

    /// [`BwTree::scan`] under a caller-held epoch pin.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::scan`].
    pub fn scan_with_guard(
        &self,
        lo: Key,
        hi: Key,
        _guard: &Guard,
    ) -> Result<Vec<(Key, Value)>, IndexError> {
        if lo >= hi {
            return Ok(Vec::new());
        }

        let head: u64 = self.pages.get(ROOT_PAGE_ID);

        // SAFETY: `head` was loaded under `_guard`'s pin; see `lookup`.
        let folded = unsafe { delta::fold_chain(head) }
            .map_err(IndexError::NeedsStructuralHandling)?;

        Ok(folded
            .range(lo..hi)
            .filter_map(|(&key, &outcome)| outcome.map(|value| (key, value)))
            .collect())
    }

    // ------------------------------------------------------------------------
    //  Maintenance
    // ------------------------------------------------------------------------

    /// Best-effort epoch collection of retired chain memory.
    ///
    /// Never blocks; returns the number of records freed.
    pub fn collect_garbage(&self) -> usize {
        let guard = self.guard();
        guard.try_collect()
    }

    /// Number of delta records currently on `page`'s chain.
    ///
    /// # Panics
    ///
    /// Panics if `page` is outside the table capacity.
    #[must_use]
    pub fn chain_length(&self, page: PageId) -> usize {
        let _guard = self.guard();
        let head: u64 = self.pages.get(page);

        // SAFETY: `head` loaded under `_guard`'s pin.
        unsafe { delta::chain_length(head) }
    }

    // ------------------------------------------------------------------------
    //  Append-delta protocol
    // ------------------------------------------------------------------------

    fn append_delta(&self, page: PageId, op: DeltaOp, guard: &Guard) -> Result<(), IndexError> {
        let mut delta: Box<PageNode> = PageNode::delta(op);
        let mut backoff = SpinBackoff::new(
            self.config.consolidation_spin_limit,
            self.config.backoff_min_ns,
            self.config.backoff_max_ns,
        );

        let mut head: u64 = self.pages.get(page);

        loop {
            delta.set_next(head);
            let addr: u64 = PageNode::into_addr(delta);

            match self.pages.update(page, head, addr) {
                Ok(()) => {
                    self.after_publish(page, addr, guard);
                    return Ok(());
                }

                Err(observed) => {
                    // SAFETY: the CAS failed, so the record was never
                    // published and we still own it exclusively.
                    delta = unsafe { PageNode::from_addr(addr) };
                    head = observed;

                    if !backoff.should_retry(self.config.cas_max_retries) {
                        warn_log!(page, "append-delta retry cap exhausted");
                        // The rejected record is dropped here, unpublished.
                        return Err(IndexError::RetriesExhausted);
                    }

                    trace_log!(page, attempt = backoff.attempt(), "append-delta conflict");
                    backoff.backoff();
                }
            }
        }
    }

    fn after_publish(&self, page: PageId, new_head: u64, guard: &Guard) {
        // SAFETY: `new_head` was just published by this thread and `guard`
        // keeps the chain alive.
        let chain_len: usize = unsafe { delta::chain_length(new_head) };
        if chain_len > self.config.max_delta_chain_length {
            // Best-effort: a racing writer or consolidator may win instead.
            let _ = self.consolidate_with_guard(page, guard);
        }

        let ops: u64 = self.write_ops.fetch_add(1, RELAXED) + 1;
        if ops % EPOCH_ADVANCE_INTERVAL == 0 {
            self.epoch.advance_global();
            let _ = guard.try_collect();
        }
    }
}

impl Default for BwTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BwTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BwTree")
            .field("capacity", &self.pages.capacity())
            .field("root_chain", &self.chain_length(ROOT_PAGE_ID))
            .finish_non_exhaustive()
    }
}

impl Drop for BwTree {
    fn drop(&mut self) {
        // `&mut self`: no operation is in flight, so chains can be freed
        // directly without the epoch protocol.
        for id in 0..self.pages.capacity() as u64 {
            let mut addr: u64 = self.pages.get(id);
            self.pages.set(id, NULL_ADDR);

            while addr != NULL_ADDR {
                // SAFETY: the slot is cleared and nothing else can reach
                // this chain; each cell is freed exactly once.
                let node = unsafe { PageNode::from_addr(addr) };
                addr = match &*node {
                    PageNode::Delta(rec) => rec.next,
                    PageNode::Base(_) => NULL_ADDR,
                };
            }
        }

        // Retired records were already detached from every slot; quiescence
        // holds for the same reason the direct walk above is sound.
        self.epoch.flush();
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_lookup() {
        let tree = BwTree::new();
        tree.insert(42, 100).unwrap();

        assert_eq!(tree.lookup(42).unwrap(), Some(100));
        assert_eq!(tree.lookup(99).unwrap(), None);
    }

    #[test]
    fn test_overwrite_newest_wins() {
        let tree = BwTree::new();
        tree.insert(42, 100).unwrap();
        tree.insert(42, 200).unwrap();

        assert_eq!(tree.lookup(42).unwrap(), Some(200));
    }

    #[test]
    fn test_delete_tombstones() {
        let tree = BwTree::new();
        tree.insert(42, 100).unwrap();
        tree.delete(42).unwrap();

        assert_eq!(tree.lookup(42).unwrap(), None);
    }

    #[test]
    fn test_delete_absent_key_is_fine() {
        let tree = BwTree::new();
        tree.delete(7).unwrap();
        assert_eq!(tree.lookup(7).unwrap(), None);
    }

    #[test]
    fn test_lookup_on_empty_tree() {
        let tree = BwTree::new();
        assert_eq!(tree.lookup(0).unwrap(), None);
        assert_eq!(tree.chain_length(ROOT_PAGE_ID), 0);
    }

    #[test]
    fn test_writes_trigger_consolidation_past_threshold() {
        let tree = BwTree::new();
        let threshold = tree.config().max_delta_chain_length;

        for i in 0..(threshold as i64 + 5) {
            tree.insert(i, i as u64).unwrap();
        }

        // The inline consolidation keeps the chain bounded.
        assert!(tree.chain_length(ROOT_PAGE_ID) <= threshold);

        for i in 0..(threshold as i64 + 5) {
            assert_eq!(tree.lookup(i).unwrap(), Some(i as u64), "key {i}");
        }
    }

    #[test]
    fn test_scan_empty_and_inverted_ranges() {
        let tree = BwTree::new();
        tree.insert(1, 10).unwrap();

        assert_eq!(tree.scan(5, 5).unwrap(), vec![]);
        assert_eq!(tree.scan(9, 2).unwrap(), vec![]);
    }

    #[test]
    fn test_scan_respects_newest_delta() {
        let tree = BwTree::new();
        for i in 0..5 {
            tree.insert(i, (i * 10) as u64).unwrap();
        }
        tree.delete(2).unwrap();
        tree.insert(3, 999).unwrap();

        let result = tree.scan(0, 5).unwrap();
        assert_eq!(result, vec![(0, 0), (1, 10), (3, 999), (4, 40)]);
    }

    #[test]
    fn test_collect_garbage_never_fails() {
        let tree = BwTree::new();
        for i in 0..100 {
            tree.insert(i, i as u64).unwrap();
        }
        // Whatever is aged gets freed; the call itself is best-effort.
        let _ = tree.collect_garbage();
    }

    #[test]
    fn test_guarded_batch_operations() {
        let tree = BwTree::new();
        let guard = tree.guard();

        for i in 0..20 {
            tree.insert_with_guard(i, (i * 2) as u64, &guard).unwrap();
        }
        for i in 0..20 {
            assert_eq!(tree.lookup_with_guard(i, &guard).unwrap(), Some((i * 2) as u64));
        }
    }

    #[test]
    fn test_drop_with_populated_chains_and_garbage() {
        let tree = BwTree::new();
        for i in 0..500 {
            tree.insert(i, i as u64).unwrap();
        }
        for i in 0..250 {
            tree.delete(i).unwrap();
        }
        drop(tree); // must free every chain and retired record
    }
}
