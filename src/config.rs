//! Runtime configuration for the index engine.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the concurrent index engine.
///
/// The defaults favor read latency: short delta chains, a tight backoff
/// floor, and a small reclamation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of logical page-id slots in the page table.
    ///
    /// Fixed at construction; the table does not resize.
    pub page_table_capacity: usize,

    /// Delta-chain length that triggers consolidation when exceeded.
    ///
    /// Bounds read latency to O(threshold) link hops for unconsolidated keys
    /// plus O(log n) in the base node.
    pub max_delta_chain_length: usize,

    /// CAS retry cap before a write is reported as failed.
    pub cas_max_retries: u32,

    /// Minimum exponential-backoff delay in nanoseconds.
    pub backoff_min_ns: u64,

    /// Maximum exponential-backoff delay in nanoseconds.
    pub backoff_max_ns: u64,

    /// Deferred-free queue length that triggers an automatic collection.
    pub garbage_batch_size: usize,

    /// Tight CAS attempts (with a CPU pause hint) before exponential backoff.
    pub consolidation_spin_limit: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_table_capacity: 1024,
            max_delta_chain_length: 10,
            cas_max_retries: 100,
            backoff_min_ns: 1,
            backoff_max_ns: 1_000_000, // 1 ms
            garbage_batch_size: 64,
            consolidation_spin_limit: 10,
        }
    }
}
