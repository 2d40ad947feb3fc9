//! Epoch-based reclamation for retired chain memory.
//!
//! A published record may be read by any number of in-flight readers, so it
//! cannot be freed the moment it becomes unreachable. Instead, retirement
//! hands the address to a per-participant deferred-free queue, and the free
//! happens only once no pinned participant could still observe it.
//!
//! # Protocol
//!
//! - Every manager owns an atomic *global epoch*, advanced from writer paths.
//! - A participant *pins* before touching shared chains: it reads the global
//!   epoch (Acquire) and publishes it into its pinned slot (Release). The
//!   returned [`Guard`] clears the slot when the outermost pin drops.
//! - [`Guard::defer_free`] queues `(address, retire-epoch)` with the current
//!   global epoch; once the queue reaches the batch threshold a collection
//!   is attempted automatically.
//! - Collection computes the minimum pinned epoch across all participants
//!   (the "none" sentinel does not block) and frees every queued entry whose
//!   `retire-epoch + 2 <= minimum`. The two-epoch margin covers the window
//!   between a reader loading the global epoch and publishing its pin: any
//!   reader that could have loaded a pointer before the retire has exited
//!   two epoch boundaries by then.
//!
//! Collection never blocks; under lock contention it simply defers. The
//! shutdown-only [`EpochManager::flush`] frees every queue unconditionally
//! and requires the caller to guarantee quiescence.
//!
//! Queued entries carry an explicit reclaimer callback, so this module knows
//! nothing about the node types it frees.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::Mutex;

use crate::ordering::{CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};
use crate::tracing_helpers::trace_log;

/// Sentinel pinned-epoch value meaning "not pinned".
pub const EPOCH_NONE: u64 = u64::MAX;

/// Default deferred-free queue length that triggers collection.
pub const DEFAULT_GARBAGE_BATCH: usize = 64;

/// Epochs a retired address must age past the minimum pin before freeing.
const SAFETY_MARGIN: u64 = 2;

/// Callback that frees the allocation behind a retired address.
///
/// # Safety
///
/// Called at most once per queued address, only after the epoch protocol
/// proves no pinned participant can still observe it.
pub type ReclaimFn = unsafe fn(u64);

// ============================================================================
//  Shared state
// ============================================================================

/// A deferred-free entry.
struct Retired {
    addr: u64,
    retire_epoch: u64,
    reclaim: ReclaimFn,
}

/// Per-participant state, shared with the registry for pin scanning.
struct ParticipantSlot {
    /// Epoch this participant currently pins, or [`EPOCH_NONE`].
    pinned: AtomicU64,
    /// Pin nesting depth. Touched only by the owning thread.
    pin_depth: AtomicU64,
    /// Deferred frees queued by this participant.
    retired: Mutex<Vec<Retired>>,
}

struct EpochShared {
    /// The monotonic global epoch.
    global: AtomicU64,
    /// Every participant ever registered. Slots are never removed; a
    /// dropped participant leaves an unpinned slot behind, which cannot
    /// block collection.
    registry: Mutex<Vec<Arc<ParticipantSlot>>>,
}

impl EpochShared {
    /// Minimum pinned epoch across all participants, or [`EPOCH_NONE`] when
    /// nothing is pinned. Returns `None` when the registry lock is
    /// contended, so callers defer instead of blocking.
    fn try_min_pinned(&self) -> Option<u64> {
        let registry = self.registry.try_lock()?;

        let mut min: u64 = EPOCH_NONE;
        for slot in registry.iter() {
            let pinned: u64 = slot.pinned.load(READ_ORD);
            if pinned < min {
                min = pinned;
            }
        }

        Some(min)
    }
}

impl Drop for EpochShared {
    fn drop(&mut self) {
        // Last handle gone: every participant and guard has been dropped,
        // so nothing can observe the queued addresses any more.
        for slot in self.registry.get_mut().iter() {
            for entry in slot.retired.lock().drain(..) {
                // SAFETY: quiescent by construction; each entry freed once.
                unsafe { (entry.reclaim)(entry.addr) };
            }
        }
    }
}

// ============================================================================
//  EpochManager
// ============================================================================

/// Handle to one reclamation domain.
///
/// Cheap to clone; all clones share the same global epoch and registry. The
/// manager is instance-scoped state: two managers never interact, which
/// keeps tests and multiple indexes in one process isolated.
#[derive(Clone)]
pub struct EpochManager {
    shared: Arc<EpochShared>,
    batch: usize,
}

impl EpochManager {
    /// Create a manager with the default collection batch size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_batch(DEFAULT_GARBAGE_BATCH)
    }

    /// Create a manager whose queues collect once they reach `batch`
    /// entries. A batch of zero collects on every retirement.
    #[must_use]
    pub fn with_batch(batch: usize) -> Self {
        Self {
            shared: Arc::new(EpochShared {
                global: AtomicU64::new(0),
                registry: Mutex::new(Vec::new()),
            }),
            batch,
        }
    }

    /// Current global epoch (Acquire).
    #[must_use]
    pub fn global_epoch(&self) -> u64 {
        self.shared.global.load(READ_ORD)
    }

    /// Atomically increment the global epoch, returning the new value.
    ///
    /// Invoked periodically from writer paths; advancing is what lets aged
    /// retirements become collectable.
    pub fn advance_global(&self) -> u64 {
        self.shared.global.fetch_add(1, CAS_SUCCESS) + 1
    }

    /// Register a new participant.
    ///
    /// Participants are single-threaded actors; each operating thread
    /// registers its own (or uses [`EpochManager::pin`], which does so
    /// transparently).
    #[must_use]
    pub fn register(&self) -> Participant {
        let slot = Arc::new(ParticipantSlot {
            pinned: AtomicU64::new(EPOCH_NONE),
            pin_depth: AtomicU64::new(0),
            retired: Mutex::new(Vec::new()),
        });

        self.shared.registry.lock().push(Arc::clone(&slot));

        Participant {
            shared: Arc::clone(&self.shared),
            slot,
            batch: self.batch,
            _not_sync: PhantomData,
        }
    }

    /// Pin the current epoch through this thread's cached participant,
    /// registering one on first use.
    #[must_use]
    pub fn pin(&self) -> Guard {
        LOCAL_PARTICIPANTS.with(|cell| {
            let mut local = cell.borrow_mut();
            let key: usize = Arc::as_ptr(&self.shared) as usize;

            if let Some((_, participant)) = local.iter().find(|(k, _)| *k == key) {
                return participant.pin();
            }

            let participant = self.register();
            let guard = participant.pin();
            local.push((key, participant));
            guard
        })
    }

    /// Free every queued entry unconditionally.
    ///
    /// Shutdown-only: the caller must guarantee that no participant holds a
    /// pin and that no queued address can still be observed.
    pub fn flush(&self) {
        let registry = self.shared.registry.lock();
        for slot in registry.iter() {
            for entry in slot.retired.lock().drain(..) {
                // SAFETY: caller-guaranteed quiescence; each entry freed once.
                unsafe { (entry.reclaim)(entry.addr) };
            }
        }
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EpochManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochManager")
            .field("global", &self.global_epoch())
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

// Cached participants for `EpochManager::pin`, keyed by the manager's shared
// allocation. The cached `Participant` keeps that allocation alive, so a key
// can never be reused while its entry exists.
thread_local! {
    static LOCAL_PARTICIPANTS: RefCell<Vec<(usize, Participant)>> =
        const { RefCell::new(Vec::new()) };
}

// ============================================================================
//  Participant
// ============================================================================

/// One registered actor of a reclamation domain.
///
/// Owns a pinned-epoch slot and a deferred-free queue. A participant belongs
/// to a single thread; it may be sent to another thread but never shared.
pub struct Participant {
    shared: Arc<EpochShared>,
    slot: Arc<ParticipantSlot>,
    batch: usize,
    // Cell<()> keeps the handle Send but !Sync.
    _not_sync: PhantomData<Cell<()>>,
}

impl Participant {
    /// Pin the current global epoch and return a scoped guard.
    ///
    /// Nested pins are cheap: only the outermost pin publishes, and the
    /// epoch stays fixed until the outermost guard drops.
    #[must_use]
    pub fn pin(&self) -> Guard {
        pin_slot(&self.shared, &self.slot, self.batch)
    }

    /// Epoch currently pinned by this participant, if any.
    #[must_use]
    pub fn pinned_epoch(&self) -> Option<u64> {
        let pinned: u64 = self.slot.pinned.load(READ_ORD);
        (pinned != EPOCH_NONE).then_some(pinned)
    }

    /// Queue `addr` for deferred freeing at the current global epoch.
    ///
    /// Reaching the batch threshold triggers a best-effort collection.
    pub fn defer_free(&self, addr: u64, reclaim: ReclaimFn) {
        defer_free_slot(&self.shared, &self.slot, self.batch, addr, reclaim);
    }

    /// Attempt to free aged entries from this participant's queue.
    ///
    /// Never blocks; on lock contention reclamation is simply deferred.
    /// Returns the number of entries freed.
    pub fn try_collect(&self) -> usize {
        try_collect_slot(&self.shared, &self.slot)
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn retired_len(&self) -> usize {
        self.slot.retired.lock().len()
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("pinned", &self.pinned_epoch())
            .field("retired", &self.retired_len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Guard
// ============================================================================

/// Scoped proof that an epoch is pinned.
///
/// While any guard of a participant is alive, every address that was
/// reachable at pin time stays dereferenceable. The pinned slot is cleared
/// when the outermost guard drops, on every exit path including unwinding.
#[must_use = "dropping the guard immediately unpins the epoch"]
pub struct Guard {
    shared: Arc<EpochShared>,
    slot: Arc<ParticipantSlot>,
    batch: usize,
    // Raw pointer keeps the guard on its pinning thread (!Send + !Sync).
    _not_send: PhantomData<*mut ()>,
}

impl Guard {
    /// The epoch this guard pins.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.slot.pinned.load(RELAXED)
    }

    /// Queue `addr` for deferred freeing. See [`Participant::defer_free`].
    pub fn defer_free(&self, addr: u64, reclaim: ReclaimFn) {
        defer_free_slot(&self.shared, &self.slot, self.batch, addr, reclaim);
    }

    /// Best-effort collection. See [`Participant::try_collect`].
    pub fn try_collect(&self) -> usize {
        try_collect_slot(&self.shared, &self.slot)
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let depth: u64 = self.slot.pin_depth.fetch_sub(1, RELAXED);
        if depth == 1 {
            self.slot.pinned.store(EPOCH_NONE, WRITE_ORD);
        }
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").field("epoch", &self.epoch()).finish()
    }
}

// ============================================================================
//  Slot operations
// ============================================================================

fn pin_slot(shared: &Arc<EpochShared>, slot: &Arc<ParticipantSlot>, batch: usize) -> Guard {
    if slot.pin_depth.fetch_add(1, RELAXED) == 0 {
        let epoch: u64 = shared.global.load(READ_ORD);
        slot.pinned.store(epoch, WRITE_ORD);
    }

    Guard {
        shared: Arc::clone(shared),
        slot: Arc::clone(slot),
        batch,
        _not_send: PhantomData,
    }
}

fn defer_free_slot(
    shared: &EpochShared,
    slot: &ParticipantSlot,
    batch: usize,
    addr: u64,
    reclaim: ReclaimFn,
) {
    let retire_epoch: u64 = shared.global.load(READ_ORD);

    let at_threshold: bool = {
        let mut queue = slot.retired.lock();
        queue.push(Retired {
            addr,
            retire_epoch,
            reclaim,
        });
        queue.len() >= batch
    };

    if at_threshold {
        let _ = try_collect_slot(shared, slot);
    }
}

fn try_collect_slot(shared: &EpochShared, slot: &ParticipantSlot) -> usize {
    let Some(min_pinned) = shared.try_min_pinned() else {
        return 0;
    };

    let Some(mut queue) = slot.retired.try_lock() else {
        return 0;
    };

    let before: usize = queue.len();
    queue.retain(|entry| {
        if entry.retire_epoch.saturating_add(SAFETY_MARGIN) <= min_pinned {
            // SAFETY: the entry aged past every pinned epoch; this queue is
            // the sole owner of the address, so it is freed exactly once.
            unsafe { (entry.reclaim)(entry.addr) };
            false
        } else {
            true
        }
    });

    let freed: usize = before - queue.len();
    if freed > 0 {
        trace_log!(freed, remaining = queue.len(), "epoch collection");
    }
    freed
}

// ============================================================================
//  Tests
// ============================================================================
