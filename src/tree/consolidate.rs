//! Chain consolidation: collapse a delta chain into a fresh base node and
//! swing the page-table slot to it.
//!
//! Consolidation is optimistic and idempotent: many producers may race on
//! the same page, but only one CAS installs, and losers discard their
//! candidate without side effects. Readers in flight keep walking the old
//! chain under their epoch pins; the chain is retired, not freed, on
//! success.

use crate::base::BaseNode;
use crate::delta::{self, PageNode, NULL_ADDR};
use crate::epoch::Guard;
use crate::tracing_helpers::debug_log;
use crate::{IndexError, PageId};

use super::BwTree;

impl BwTree {
    /// Collapse `page`'s delta chain into a base node.
    ///
    /// The fold applies deltas newest-to-oldest into a final per-key state;
    /// the first entry for a key is authoritative, the old base fills in
    /// undecided keys, and tombstones are dropped from the result. A fold
    /// that leaves nothing present still installs an empty base node, so
    /// the slot stays mapped.
    ///
    /// # Errors
    ///
    /// - [`IndexError::PageUnmapped`] for an out-of-capacity id or a slot
    ///   holding no chain.
    /// - [`IndexError::NeedsStructuralHandling`] when the chain carries a
    ///   Split or Merge delta.
    /// - [`IndexError::ConsolidationSuperseded`] when another writer
    ///   altered the chain first; the candidate was discarded and the
    ///   caller may retry.
    pub fn consolidate(&self, page: PageId) -> Result<(), IndexError> {
        let guard = self.guard();
        self.consolidate_with_guard(page, &guard)
    }

    /// [`BwTree::consolidate`] under a caller-held epoch pin.
    ///
    /// # Errors
    ///
    /// Same as [`BwTree::consolidate`].
    pub fn consolidate_with_guard(&self, page: PageId, guard: &Guard) -> Result<(), IndexError> {
        if page as usize >= self.pages.capacity() {
            return Err(IndexError::PageUnmapped(page));
        }

        let old_head: u64 = self.pages.get(page);
        if old_head == NULL_ADDR {
            return Err(IndexError::PageUnmapped(page));
        }

        // SAFETY: `old_head` was loaded under `guard`'s pin, so the chain
        // stays live for the fold even if a racer retires it meanwhile.
        let folded = unsafe { delta::fold_chain(old_head) }
            .map_err(IndexError::NeedsStructuralHandling)?;

        let present = folded
            .into_iter()
            .filter_map(|(key, outcome)| outcome.map(|value| (key, value)));
        let base = BaseNode::from_sorted(present);

        let new_addr: u64 = PageNode::into_addr(PageNode::base(base));

        match self.pages.update(page, old_head, new_addr) {
            Ok(()) => {
                debug_log!(page, "consolidated chain");
                // The old chain is now unreachable from the slot; hand every
                // cell to the epoch manager.
                // SAFETY: `old_head` was observed under `guard` and just
                // unlinked by our own CAS, so this thread is the only one
                // retiring it.
                unsafe { self.defer_free_chain(old_head, guard) };
                Ok(())
            }

            Err(_current) => {
                // SAFETY: the candidate was never published; we still own it.
                drop(unsafe { PageNode::from_addr(new_addr) });
                Err(IndexError::ConsolidationSuperseded)
            }
        }
    }

    /// Retire every cell of an unlinked chain.
    ///
    /// # Safety
    ///
    /// `head` must be a chain that this caller just made unreachable (its
    /// slot CAS succeeded), observed under `guard`'s pin.
    unsafe fn defer_free_chain(&self, head: u64, guard: &Guard) {
        let mut addr: u64 = head;

        while addr != NULL_ADDR {
            // SAFETY: the chain is pinned by `guard`; links stay readable.
            let next: u64 = match unsafe { PageNode::deref(addr) } {
                PageNode::Delta(rec) => rec.next,
                PageNode::Base(_) => NULL_ADDR,
            };

            guard.defer_free(addr, delta::reclaim_page_node);
            addr = next;
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
