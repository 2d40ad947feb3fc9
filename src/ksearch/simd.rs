//! AVX2 lower-bound search over sorted signed 64-bit keys.
//!
//! While the remaining window is at least [`LANES`] wide, the search loads
//! four consecutive keys from a lane-aligned position near the midpoint,
//! compares them element-wise against a broadcast of the target, and counts
//! the lanes strictly less than it:
//!
//! - all four less  → the boundary is right of the probe; skip past it,
//! - none less      → the boundary is at or left of the probe; retract to it,
//! - otherwise      → the boundary sits inside the probe window and the lane
//!   count pins it exactly (the input is globally sorted).
//!
//! The residual window is finished with the scalar lower bound, so both
//! routines return the same index for every target.

use std::arch::x86_64::{
    _mm256_cmpgt_epi64, _mm256_loadu_si256, _mm256_movemask_epi8, _mm256_set1_epi64x,
};

use crate::Key;

/// Vector width: four 64-bit lanes per 256-bit register.
pub const LANES: usize = 4;

/// AVX2 lower bound; identical output to the scalar search.
///
/// # Safety
///
/// The caller must ensure AVX2 is available (`is_x86_feature_detected!`).
#[target_feature(enable = "avx2")]
#[must_use]
pub unsafe fn lower_bound_avx2(keys: &[Key], target: Key) -> usize {
    let mut left: usize = 0;
    let mut right: usize = keys.len();

    // SAFETY: every load below reads LANES keys at `probe`, and `probe` is
    // clamped so `probe + LANES <= right <= keys.len()`.
    unsafe {
        let target_vec = _mm256_set1_epi64x(target);

        while right - left >= LANES {
            let mid: usize = left + (right - left) / 2;

            // Align the probe window down to a lane boundary, clamped so the
            // load stays inside [left, right).
            let mut probe: usize = mid & !(LANES - 1);
            if probe < left {
                probe = left;
            }
            if probe > right - LANES {
                probe = right - LANES;
            }

            let window = _mm256_loadu_si256(keys.as_ptr().add(probe).cast());

            // target > key  ⇔  key < target, per signed 64-bit lane.
            let lt = _mm256_cmpgt_epi64(target_vec, window);
            let lanes_lt: usize = ((_mm256_movemask_epi8(lt) as u32).count_ones() as usize) / 8;

            if lanes_lt == LANES {
                left = probe + LANES;
            } else if lanes_lt == 0 {
                right = probe;
            } else {
                // keys[probe + lanes_lt - 1] < target <= keys[probe + lanes_lt]
                left = probe + lanes_lt;
                right = left;
            }
        }
    }

    // Scalar finish on the residual window.
    #[allow(clippy::indexing_slicing)]
    let residual = &keys[left..right];
    left + super::lower_bound_scalar(residual, target)
}

// ============================================================================
//  Tests
// ============================================================================
