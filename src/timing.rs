//! Wraparound-safe microsecond timestamp arithmetic.
//!
//! Both sides of the link run free-running 32-bit microsecond counters that
//! wrap at 2^32. All deltas in the compensation machinery go through the
//! helpers here; direct comparison of raw timestamps is never meaningful.

use std::time::Instant;

/// Free-running monotonic microsecond counter.
///
/// Wraps at 2^32 µs (~71.6 minutes). Implementations must be cheap enough to
/// call from the block-complete context.
pub trait MonotonicClock: Send {
    fn now_us(&self) -> u32;
}

/// Monotonic clock backed by [`Instant`], truncated to 32 bits.
pub struct InstantClock {
    epoch: Instant,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for InstantClock {
    fn now_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }
}

/// Microseconds elapsed from `earlier` to `later` on the wrapping timeline.
#[inline]
pub fn elapsed_us(later: u32, earlier: u32) -> u32 {
    later.wrapping_sub(earlier)
}

/// Fold a timestamp delta into the signed range `(-period/2, +period/2]`.
///
/// Exactly half a period stays positive. Used to express the phase of the
/// remote clock relative to the local block boundary as a signed error.
/// `period_us` must be nonzero.
#[inline]
pub fn fold_into_half(delta_us: u32, period_us: u32) -> i32 {
    debug_assert!(period_us > 0);
    let m = (delta_us % period_us) as i32;
    if m > (period_us / 2) as i32 {
        m - period_us as i32
    } else {
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_across_wrap() {
        assert_eq!(elapsed_us(5, u32::MAX - 4), 10);
        assert_eq!(elapsed_us(1_000, 0), 1_000);
    }

    #[test]
    fn test_fold_centers_phase() {
        assert_eq!(fold_into_half(0, 1_000), 0);
        assert_eq!(fold_into_half(499, 1_000), 499);
        assert_eq!(fold_into_half(500, 1_000), 500);
        assert_eq!(fold_into_half(501, 1_000), -499);
        assert_eq!(fold_into_half(999, 1_000), -1);
        assert_eq!(fold_into_half(1_000, 1_000), 0);
        assert_eq!(fold_into_half(2_501, 1_000), -499);
    }

    #[test]
    fn test_fold_of_negative_delta_carries_counter_residue() {
        // A negative delta is a huge unsigned one; 2^32 % 1000 = 296, so
        // "remote 3 µs behind local" folds to 293, not -3.
        let delta = elapsed_us(2, 5);
        assert_eq!(fold_into_half(delta, 1_000), 293);
    }

    #[test]
    fn test_instant_clock_advances() {
        let clock = InstantClock::new();
        let a = clock.now_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(elapsed_us(clock.now_us(), a) >= 2_000);
    }
}
