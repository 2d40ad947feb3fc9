//! Delta records and the chain data model.
//!
//! A logical node's mutable state is represented as an ordered log of
//! immutable records: typed deltas singly linked from newest to oldest,
//! terminated by a [`BaseNode`] or by the null address (an empty node). The
//! page-table slot holding the head address is the only mutable pointer.
//!
//! # Chronology rule
//!
//! Writers prepend, so the head is the newest record and readers apply
//! first-match-wins: the first delta mentioning the queried key decides the
//! outcome. Insert → present, Delete → absent, Split/Merge → a structural
//! redirect this single-node engine surfaces rather than applies.
//!
//! # Immutability
//!
//! A record is built and linked by exactly one writer, and is never mutated
//! once its address becomes observable through a page-table slot. A record
//! rejected by CAS failure is still exclusively owned by its writer and is
//! reclaimed immediately; a published record lives until consolidation
//! retires its chain through the epoch manager.

use std::collections::BTreeMap;

use crate::base::BaseNode;
use crate::{Key, PageId, Value};

/// Address value marking the end of a chain (and an unmapped slot).
pub const NULL_ADDR: u64 = 0;

// ============================================================================
//  Records
// ============================================================================

/// Typed payload of a delta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    /// Establishes `key → value` at this chain position.
    Insert {
        /// The key being written.
        key: Key,
        /// The value it maps to.
        value: Value,
    },

    /// Tombstone: `key` is absent from this chain position.
    Delete {
        /// The key being removed.
        key: Key,
    },

    /// Keys `>= split_key` logically live at `sibling`.
    Split {
        /// First key owned by the sibling.
        split_key: Key,
        /// Page holding the upper half.
        sibling: PageId,
    },

    /// This node has been folded into `merged_into`.
    Merge {
        /// Page that absorbed this node.
        merged_into: PageId,
    },
}

/// A single immutable update record.
#[derive(Debug)]
pub struct DeltaRecord {
    /// The operation this record applies.
    pub op: DeltaOp,
    /// Address of the next (older) record, or [`NULL_ADDR`].
    pub next: u64,
}

/// One heap cell of a delta chain: a delta record or a terminating base node.
///
/// The enum discriminant is the variant tag the traversal dispatches on, so
/// a chain walk can never misread one record kind as another.
#[derive(Debug)]
pub enum PageNode {
    /// An update record with a link to the rest of the chain.
    Delta(DeltaRecord),
    /// A sorted snapshot terminating the chain.
    Base(BaseNode),
}

impl PageNode {
    /// Allocate a fresh, unlinked delta record.
    #[must_use]
    pub fn delta(op: DeltaOp) -> Box<Self> {
        Box::new(Self::Delta(DeltaRecord {
            op,
            next: NULL_ADDR,
        }))
    }

    /// Allocate a base node cell.
    #[must_use]
    pub fn base(base: BaseNode) -> Box<Self> {
        Box::new(Self::Base(base))
    }

    /// Point an unpublished delta at the rest of the chain.
    ///
    /// No-op for base cells, which terminate a chain.
    pub fn set_next(&mut self, next: u64) {
        if let Self::Delta(rec) = self {
            rec.next = next;
        }
    }

    /// Leak the cell and return its address for publication via slot CAS.
    #[must_use]
    pub fn into_addr(node: Box<Self>) -> u64 {
        Box::into_raw(node) as u64
    }

    /// Reconstruct ownership of the cell at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must come from [`PageNode::into_addr`], must not be reachable
    /// through any page-table slot, and must not have been reclaimed.
    #[must_use]
    pub unsafe fn from_addr(addr: u64) -> Box<Self> {
        // SAFETY: caller guarantees exclusive ownership of a live allocation.
        unsafe { Box::from_raw(addr as *mut Self) }
    }

    /// Borrow the cell at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be nonzero and point to a live cell, and the caller must
    /// hold an epoch pin taken before `addr` was observed, so the cell
    /// cannot be reclaimed for the borrow's duration.
    #[must_use]
    pub unsafe fn deref<'g>(addr: u64) -> &'g Self {
        // SAFETY: caller guarantees liveness for the pin's duration.
        unsafe { &*(addr as *const Self) }
    }
}

/// Reclaimer callback handed to the epoch manager for deferred frees.
///
/// # Safety
///
/// `addr` must be an unreachable [`PageNode`] allocation produced by
/// [`PageNode::into_addr`], freed at most once.
pub unsafe fn reclaim_page_node(addr: u64) {
    // SAFETY: per contract, we hold the last reference to this cell. The
    // `next` field is a plain integer, so dropping one cell never follows
    // the chain.
    drop(unsafe { PageNode::from_addr(addr) });
}

// ============================================================================
//  Chain traversal
// ============================================================================

/// Structural redirect discovered during a chain walk.
///
/// Split and Merge deltas are defined in the data model but not applied by
/// the single-node operation protocols; a walk that meets one reports it
/// explicitly instead of misreading it as a data delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralHint {
    /// Keys at or above `split_key` live at `sibling`.
    Split {
        /// First key owned by the sibling.
        split_key: Key,
        /// Page holding the upper half.
        sibling: PageId,
    },
    /// The whole node was folded into `merged_into`.
    Merge {
        /// Page that absorbed this node.
        merged_into: PageId,
    },
}

/// Resolve `key` against the chain starting at `head`.
///
/// First match wins; the base node decides keys no delta mentions. A Split
/// delta redirects only the keys it covers, a Merge delta redirects every
/// key.
///
/// # Errors
///
/// Returns the structural hint when the outcome for `key` lives on another
/// page.
///
/// # Safety
///
/// `head` must have been loaded from a page-table slot while the caller
/// held an epoch pin that is still active.
pub unsafe fn resolve_key(head: u64, key: Key) -> Result<Option<Value>, StructuralHint> {
    let mut addr: u64 = head;

    while addr != NULL_ADDR {
        // SAFETY: `addr` is the head or a `next` link of a published, pinned
        // chain; epoch reclamation keeps every link live for this walk.
        match unsafe { PageNode::deref(addr) } {
            PageNode::Delta(rec) => {
                match rec.op {
                    DeltaOp::Insert { key: k, value } if k == key => return Ok(Some(value)),
                    DeltaOp::Delete { key: k } if k == key => return Ok(None),
                    DeltaOp::Split { split_key, sibling } if key >= split_key => {
                        return Err(StructuralHint::Split { split_key, sibling });
                    }
                    DeltaOp::Merge { merged_into } => {
                        return Err(StructuralHint::Merge { merged_into });
                    }
                    _ => {}
                }
                addr = rec.next;
            }
            PageNode::Base(base) => return Ok(base.get(key)),
        }
    }

    Ok(None)
}

/// Fold a chain newest-to-oldest into final per-key outcomes.
///
/// The first decision for a key is authoritative (never overwritten); base
/// entries fill in only the undecided keys. Tombstones are retained as
/// `None` so callers can distinguish "deleted" from "never seen".
///
/// # Errors
///
/// Returns the structural hint for any Split or Merge delta on the chain;
/// folding across pages needs tree-structural handling this engine does not
/// perform.
///
/// # Safety
///
/// Same contract as [`resolve_key`].
pub unsafe fn fold_chain(head: u64) -> Result<BTreeMap<Key, Option<Value>>, StructuralHint> {
    let mut decided: BTreeMap<Key, Option<Value>> = BTreeMap::new();
    let mut addr: u64 = head;

    while addr != NULL_ADDR {
        // SAFETY: see `resolve_key`.
        match unsafe { PageNode::deref(addr) } {
            PageNode::Delta(rec) => {
                match rec.op {
                    DeltaOp::Insert { key, value } => {
                        decided.entry(key).or_insert(Some(value));
                    }
                    DeltaOp::Delete { key } => {
                        decided.entry(key).or_insert(None);
                    }
                    DeltaOp::Split { split_key, sibling } => {
                        return Err(StructuralHint::Split { split_key, sibling });
                    }
                    DeltaOp::Merge { merged_into } => {
                        return Err(StructuralHint::Merge { merged_into });
                    }
                }
                addr = rec.next;
            }
            PageNode::Base(base) => {
                for (key, value) in base.entries() {
                    decided.entry(key).or_insert(Some(value));
                }
                break;
            }
        }
    }

    Ok(decided)
}

/// Number of delta records between `head` and the chain terminator.
///
/// # Safety
///
/// Same contract as [`resolve_key`].
#[must_use]
pub unsafe fn chain_length(head: u64) -> usize {
    let mut len: usize = 0;
    let mut addr: u64 = head;

    while addr != NULL_ADDR {
        // SAFETY: see `resolve_key`.
        match unsafe { PageNode::deref(addr) } {
            PageNode::Delta(rec) => {
                len += 1;
                addr = rec.next;
            }
            PageNode::Base(_) => break,
        }
    }

    len
}

// ============================================================================
//  Tests
// ============================================================================
