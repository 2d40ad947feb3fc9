//! Standard memory orderings for page-table and epoch access.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for loading a page-table slot or the global epoch.
/// Pairs with the publisher's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for unconditional publishes (slot stores, pinned-epoch stores).
/// Pairs with the reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success on a slot, and for the global epoch increment.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure.
/// Only need to see the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for counters whose values carry no publication obligation.
pub const RELAXED: Ordering = Ordering::Relaxed;
