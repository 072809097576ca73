//! Exponential backoff used by the retry executor.
//!
//! Attempt semantics: attempt index `0` is the wait after the first failed call, so
//! `delay(0) == initial_delay` and `delay(n) == initial_delay * multiplier^n`, capped at
//! `max_delay`. Jitter is layered on afterwards by [`crate::Jitter`], after the cap.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use backstop::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(1000))
//!     .with_max(Duration::from_millis(5000))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(1000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(4000));
//! assert_eq!(backoff.delay(3), Duration::from_millis(5000)); // capped
//! ```
//!
//! Overflow behavior: products that would overflow saturate to the configured `max_delay`.
//! Without an explicit cap, `max_delay` is `MAX_BACKOFF` (1 day) or `initial`, whichever is larger.

use crate::retry::RetryConfig;
use std::time::Duration;

/// Ceiling used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Multiplier applied when none is configured.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("backoff multiplier must be a finite number >= 1 (got {0})")]
    InvalidMultiplier(f64),
    #[error("max delay ({max:?}) must be >= initial delay ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Exponential backoff: `initial * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Exponential backoff doubling from `initial`, capped by `MAX_BACKOFF` unless `initial`
    /// is already longer.
    pub fn exponential(initial: Duration) -> Self {
        Self { initial, max: MAX_BACKOFF.max(initial), multiplier: DEFAULT_MULTIPLIER }
    }

    /// Same delay on every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self { initial: delay, max: delay, multiplier: 1.0 }
    }

    /// Cap the computed delay. Errors if `max < initial`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max < self.initial {
            return Err(BackoffError::MaxLessThanInitial { initial: self.initial, max });
        }
        self.max = max;
        Ok(self)
    }

    /// Growth factor per attempt. Must be finite and >= 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        self.multiplier = multiplier;
        Ok(self)
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Un-jittered delay for a 0-based attempt index.
    pub fn delay(&self, attempt: usize) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let factor = self.multiplier.powi(exponent);
        let ceiling = self.max.as_nanos().min(u64::MAX as u128) as f64;
        let nanos = (self.initial.as_nanos() as f64 * factor).min(ceiling);
        Duration::from_nanos(nanos as u64).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { initial: Duration::from_secs(1), max: Duration::from_secs(30), multiplier: 2.0 }
    }
}

/// The delay calculator: backoff for `attempt`, capped, then jittered per `config`.
pub fn delay(attempt: usize, config: &RetryConfig) -> Duration {
    config.jitter().apply(config.backoff().delay(attempt))
}
