//! # bwtree
//!
//! An in-memory, latch-free ordered key-value index in the Bw-Tree family.
//!
//! Updates to a logical node are expressed as a chain of immutable *delta
//! records* prepended via compare-and-swap to an atomic head pointer stored in
//! an indirection layer (the *page table*). A background-free *consolidation*
//! step periodically collapses a chain into a compact, sorted *base node*.
//! Readers never lock: they pin an epoch, walk the chain newest-to-oldest,
//! and apply first-match-wins semantics per key.
//!
//! ## Design
//!
//! - Page-table slots are plain 64-bit atomics; a slot CAS is the only
//!   mutation primitive for published state.
//! - Delta records are immutable once their address is observable through a
//!   slot. Retired records are reclaimed through epoch-based reclamation,
//!   which also rules out ABA on the slot CAS.
//! - Contended CAS loops are spaced by exponential backoff with jitter,
//!   preceded by a short tight-spin phase.
//! - Key search within a consolidated base node uses an AVX2 lower-bound
//!   search with a scalar fallback that returns identical indices.
//!
//! ## Concurrency
//!
//! Any number of reader and writer threads may operate concurrently. Writers
//! terminate on success or on exhausting a bounded retry cap; readers never
//! fail. All slot loads are `Acquire`, all publishes `Release`, all CAS
//! `AcqRel` on success, so a reader that acquires a head pointer observes the
//! full contents of the record it points to.

#![warn(missing_docs)]

pub mod backoff;
pub mod base;
pub mod config;
pub mod delta;
pub mod epoch;
pub mod ksearch;
pub mod ordering;
pub mod page_table;
pub mod tree;

pub(crate) mod tracing_helpers;

pub use backoff::{Backoff, SpinBackoff};
pub use base::BaseNode;
pub use config::IndexConfig;
pub use delta::{DeltaOp, DeltaRecord, PageNode, StructuralHint};
pub use epoch::{EpochManager, Guard, Participant};
pub use page_table::PageTable;
pub use tree::{BwTree, IndexError};

/// Signed 64-bit key; keys are totally ordered.
pub type Key = i64;

/// Unsigned 64-bit value; an opaque payload or external pointer.
pub type Value = u64;

/// Logical page identifier, allocated densely starting at 1.
pub type PageId = u64;

/// The reserved root page id. All façade operations target this page.
pub const ROOT_PAGE_ID: PageId = 0;
