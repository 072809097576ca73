//! Jitter to spread out retries from many callers.
//!
//! Jitter here is additive: a uniform random duration in `[0, range)` is added on top of the
//! (already capped) backoff delay, so it only ever lengthens a wait.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `apply_with_rng`.
//! - Precision: nanosecond conversions saturate to `u64::MAX` to avoid panics on very large
//!   durations.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the exact backoff delay.
    #[default]
    None,
    /// Add a uniform random duration in `[0, range)`.
    Additive { range: Duration },
}

impl Jitter {
    /// Additive jitter bounded by `range` (exclusive). A zero range behaves like `None`.
    pub fn additive(range: Duration) -> Self {
        Jitter::Additive { range }
    }

    /// Whether this strategy can alter a delay at all.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Jitter::Additive { range } if !range.is_zero())
    }

    /// Upper (exclusive) bound of the added jitter.
    pub fn range(&self) -> Duration {
        match self {
            Jitter::None => Duration::ZERO,
            Jitter::Additive { range } => *range,
        }
    }

    /// Apply jitter to a delay duration.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-provided RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Additive { range } => {
                let bound = as_nanos_saturated(*range);
                if bound == 0 {
                    return delay;
                }
                let extra = Duration::from_nanos(rng.random_range(0..bound));
                delay.saturating_add(extra)
            }
        }
    }
}

fn as_nanos_saturated(duration: Duration) -> u64 {
    duration.as_nanos().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_secs(1);
        assert_eq!(Jitter::None.apply(delay), delay);
        assert!(!Jitter::None.is_enabled());
    }

    #[test]
    fn additive_jitter_stays_in_half_open_range() {
        let jitter = Jitter::additive(Duration::from_millis(1000));
        let delay = Duration::from_millis(1000);
        for _ in 0..500 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= Duration::from_millis(1000));
            assert!(jittered < Duration::from_millis(2000));
        }
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let jitter = Jitter::additive(Duration::from_millis(500));
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let delay = Duration::from_millis(100);
        assert_eq!(jitter.apply_with_rng(delay, &mut a), jitter.apply_with_rng(delay, &mut b));
    }

    #[test]
    fn zero_range_is_a_no_op() {
        let jitter = Jitter::additive(Duration::ZERO);
        assert!(!jitter.is_enabled());
        assert_eq!(jitter.apply(Duration::from_millis(10)), Duration::from_millis(10));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let jitter = Jitter::additive(Duration::MAX);
        let mut rng = StdRng::seed_from_u64(999);
        let jittered = jitter.apply_with_rng(Duration::MAX, &mut rng);
        assert_eq!(jittered, Duration::MAX);
    }
}
