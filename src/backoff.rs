//! Bounded exponential backoff with jitter for contended CAS loops.
//!
//! Exponential growth limits livelock under sustained contention; the random
//! jitter desynchronizes retries across contending writers so they do not
//! collide on the same slot in lockstep.
//!
//! # Protocol
//!
//! 1. The first `backoff()` call takes no wait at all (cheap optimism for
//!    the common single-conflict case) and only advances the counter.
//! 2. Every later call sleeps for `min · 2^attempt`, capped at `max`, plus a
//!    uniform random addend in `[0, delay/2)`.
//! 3. `should_retry(cap)` bounds the loop; the caller reports failure once
//!    the cap is exhausted.
//!
//! [`SpinBackoff`] composes a short tight-spin phase (CPU pause hint, no
//! sleeping) in front of the exponential schedule, which keeps low-contention
//! latency flat without sacrificing high-contention throughput.

use std::thread;
use std::time::Duration;

use rand::Rng;

/// Default minimum delay: 1 ns.
pub const DEFAULT_MIN_NS: u64 = 1;

/// Default maximum delay: 1 ms.
pub const DEFAULT_MAX_NS: u64 = 1_000_000;

/// Exponent cap; beyond this the delay has long since saturated at `max_ns`.
const MAX_SHIFT: u32 = 20;

/// Compute the capped exponential delay for a given attempt number.
///
/// Attempt 0 never waits; the caller short-circuits before reaching here.
pub(crate) fn delay_ns(min_ns: u64, max_ns: u64, attempt: u32) -> u64 {
    let shift: u32 = attempt.min(MAX_SHIFT);
    min_ns.saturating_mul(1u64 << shift).min(max_ns)
}

// ============================================================================
//  Backoff
// ============================================================================

/// Exponential backoff controller for a single contended operation.
///
/// One controller is created per write operation and discarded afterwards;
/// the attempt counter therefore measures conflicts of that operation alone.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    min_ns: u64,
    max_ns: u64,
}

impl Backoff {
    /// Create a controller with explicit delay bounds (nanoseconds).
    #[must_use]
    pub const fn new(min_ns: u64, max_ns: u64) -> Self {
        Self {
            attempt: 0,
            min_ns,
            max_ns,
        }
    }

    /// Number of `backoff()` calls taken since construction or `reset()`.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another retry is allowed under the given cap.
    #[must_use]
    pub const fn should_retry(&self, cap: u32) -> bool {
        self.attempt < cap
    }

    /// Take one backoff step.
    ///
    /// The first call returns immediately; later calls sleep for the capped
    /// exponential delay plus uniform jitter in `[0, delay/2)`.
    pub fn backoff(&mut self) {
        if self.attempt == 0 {
            self.attempt = 1;
            return;
        }

        let delay: u64 = delay_ns(self.min_ns, self.max_ns, self.attempt);
        let jitter: u64 = if delay >= 2 {
            rand::rng().random_range(0..delay / 2)
        } else {
            0
        };

        thread::sleep(Duration::from_nanos(delay + jitter));
        self.attempt += 1;
    }

    /// Reset the attempt counter to zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_NS, DEFAULT_MAX_NS)
    }
}

// ============================================================================
//  SpinBackoff
// ============================================================================

/// Spin-then-backoff policy for write paths.
///
/// The first `spin_limit` steps execute a short burst of CPU pause hints
/// without yielding the thread. Once the spin budget is exhausted every
/// further step delegates to the exponential [`Backoff`] schedule.
#[derive(Debug)]
pub struct SpinBackoff {
    spins: u32,
    spin_limit: u32,
    backoff: Backoff,
}

impl SpinBackoff {
    /// Create a policy with a tight-spin budget and backoff delay bounds.
    #[must_use]
    pub const fn new(spin_limit: u32, min_ns: u64, max_ns: u64) -> Self {
        Self {
            spins: 0,
            spin_limit,
            backoff: Backoff::new(min_ns, max_ns),
        }
    }

    /// Total steps taken, spin and sleep phases combined.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.spins + self.backoff.attempt()
    }

    /// Whether another retry is allowed under the given cap.
    #[must_use]
    pub const fn should_retry(&self, cap: u32) -> bool {
        self.attempt() < cap
    }

    /// Take one step: a pause-hint burst while in the spin phase, an
    /// exponential sleep afterwards.
    pub fn backoff(&mut self) {
        if self.spins < self.spin_limit {
            // Burst grows with the attempt number, capped at 64 pauses.
            let pauses: u32 = 1 << self.spins.min(6);
            for _ in 0..pauses {
                std::hint::spin_loop();
            }
            self.spins += 1;
        } else {
            self.backoff.backoff();
        }
    }

    /// Reset both phases.
    pub fn reset(&mut self) {
        self.spins = 0;
        self.backoff.reset();
    }
}

// ============================================================================
//  Tests
// ============================================================================
