//! Façade regression tests.
//!
//! End-to-end scenarios over the public API, organized by the behavior they
//! pin down:
//!
//! | Test Category | Validates |
//! |---------------|-----------|
//! | Basic Ops | insert / lookup / delete round trips |
//! | Duplicate Keys | newest-wins, insert/delete/insert sequences |
//! | Bulk | larger volumes crossing the consolidation threshold |
//! | Range Scan | ordered scans with tombstoned holes |
//! | Consolidation | chain-length boundaries, refinement, superseding |

#![allow(clippy::unwrap_used)]

mod common;

use bwtree::{BwTree, IndexConfig, IndexError, ROOT_PAGE_ID};

// ============================================================================
//  1. Basic Ops
// ============================================================================

#[test]
fn test_single_insert_lookup() {
    common::init_tracing();
    let tree = BwTree::new();

    tree.insert(42, 100).unwrap();

    assert_eq!(tree.lookup(42).unwrap(), Some(100));
    assert_eq!(tree.lookup(99).unwrap(), None);
}

#[test]
fn test_overwrite_wins_newest() {
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
fn test_lookup_on_empty_chain() {
    let tree = BwTree::new();
    assert_eq!(tree.lookup(0).unwrap(), None);
    assert_eq!(tree.lookup(i64::MIN).unwrap(), None);
    assert_eq!(tree.lookup(i64::MAX).unwrap(), None);
}

#[test]
fn test_negative_and_extreme_keys() {
    let tree = BwTree::new();

    tree.insert(i64::MIN, 1).unwrap();
    tree.insert(-1, 2).unwrap();
    tree.insert(0, 3).unwrap();
    tree.insert(i64::MAX, 4).unwrap();

    assert_eq!(tree.lookup(i64::MIN).unwrap(), Some(1));
    assert_eq!(tree.lookup(-1).unwrap(), Some(2));
    assert_eq!(tree.lookup(0).unwrap(), Some(3));
    assert_eq!(tree.lookup(i64::MAX).unwrap(), Some(4));
}

// ============================================================================
//  2. Duplicate Keys
// ============================================================================

#[test]
fn test_insert_delete_insert_sequence() {
    let tree = BwTree::new();

    tree.insert(7, 70).unwrap();
    tree.delete(7).unwrap();
    tree.insert(7, 71).unwrap();

    assert_eq!(tree.lookup(7).unwrap(), Some(71));

    // The same outcome must survive consolidation.
    tree.consolidate(ROOT_PAGE_ID).unwrap();
    assert_eq!(tree.lookup(7).unwrap(), Some(71));
}

#[test]
fn test_repeated_overwrites_track_the_latest() {
    let tree = BwTree::new();

    for v in 0..50u64 {
        tree.insert(1, v).unwrap();
        assert_eq!(tree.lookup(1).unwrap(), Some(v));
    }
}

// ============================================================================
//  3. Bulk
// ============================================================================

#[test]
fn test_bulk_then_lookup() {
    let tree = BwTree::new();

    for i in 0..100i64 {
        tree.insert(i, (10 * i) as u64).unwrap();
    }

    assert_eq!(tree.lookup(0).unwrap(), Some(0));
    assert_eq!(tree.lookup(50).unwrap(), Some(500));
    assert_eq!(tree.lookup(99).unwrap(), Some(990));
}

#[test]
fn test_bulk_delete_half() {
    let tree = BwTree::new();

    for i in 0..200i64 {
        tree.insert(i, i as u64).unwrap();
    }
    for i in (0..200i64).step_by(2) {
        tree.delete(i).unwrap();
    }

    for i in 0..200i64 {
        let expected = (i % 2 == 1).then_some(i as u64);
        assert_eq!(tree.lookup(i).unwrap(), expected, "key {i}");
    }
}

// ============================================================================
//  4. Range Scan
// ============================================================================

#[test]
fn test_range_with_a_hole() {
    let tree = BwTree::new();

    for i in 0..10i64 {
        tree.insert(i, (i * 10) as u64).unwrap();
    }
    tree.delete(5).unwrap();

    let result = tree.scan(0, 10).unwrap();
    assert_eq!(
        result,
        vec![
            (0, 0),
            (1, 10),
            (2, 20),
            (3, 30),
            (4, 40),
            (6, 60),
            (7, 70),
            (8, 80),
            (9, 90),
        ]
    );
}

#[test]
fn test_scan_bounds_are_half_open() {
    let tree = BwTree::new();
    for i in 0..5i64 {
        tree.insert(i, i as u64).unwrap();
    }

    assert_eq!(tree.scan(1, 4).unwrap(), vec![(1, 1), (2, 2), (3, 3)]);
    assert_eq!(tree.scan(4, 5).unwrap(), vec![(4, 4)]);
    assert_eq!(tree.scan(5, 100).unwrap(), vec![]);
}

// ============================================================================
//  5. Consolidation Boundaries
// ============================================================================

/// A chain of exactly the threshold length is left alone; the next write
/// crosses it and consolidates.
#[test]
fn test_chain_at_threshold_and_past_it() {
    let config = IndexConfig::default();
    let threshold = config.max_delta_chain_length;
    let tree = BwTree::with_config(config);

    for i in 0..threshold as i64 {
        tree.insert(i, i as u64).unwrap();
    }
    assert_eq!(tree.chain_length(ROOT_PAGE_ID), threshold);

    // Crossing the threshold consolidates down to a lone base node.
    tree.insert(threshold as i64, threshold as u64).unwrap();
    assert_eq!(tree.chain_length(ROOT_PAGE_ID), 0);

    for i in 0..=threshold as i64 {
        assert_eq!(tree.lookup(i).unwrap(), Some(i as u64), "key {i}");
    }
}

/// Consolidation refinement: the observable mapping is identical before and
/// after, with no intervening writes.
#[test]
fn test_consolidation_preserves_observable_mapping() {
    let tree = BwTree::new();

    for i in 0..9i64 {
        tree.insert(i, (i * 3) as u64).unwrap();
    }
    tree.delete(4).unwrap();

    let before: Vec<_> = (0..12).map(|k| tree.lookup(k).unwrap()).collect();
    tree.consolidate(ROOT_PAGE_ID).unwrap();
    let after: Vec<_> = (0..12).map(|k| tree.lookup(k).unwrap()).collect();

    assert_eq!(before, after);
}

#[test]
fn test_consolidate_before_any_write_reports_unmapped() {
    let tree = BwTree::new();
    assert_eq!(
        tree.consolidate(ROOT_PAGE_ID),
        Err(IndexError::PageUnmapped(ROOT_PAGE_ID))
    );
}

#[test]
fn test_small_threshold_config() {
    let config = IndexConfig {
        max_delta_chain_length: 2,
        ..IndexConfig::default()
    };
    let tree = BwTree::with_config(config);

    for i in 0..50i64 {
        tree.insert(i, i as u64).unwrap();
        assert!(tree.chain_length(ROOT_PAGE_ID) <= 2, "after key {i}");
    }

    for i in 0..50i64 {
        assert_eq!(tree.lookup(i).unwrap(), Some(i as u64));
    }
}
