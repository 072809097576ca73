//! Error types surfaced by the resilience layer.
use crate::fault::{FaultSignals, TransportCode};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Unified error type for breakers, retries and deadlines.
///
/// `Inner` always carries the original fault untouched, so callers can branch on "the dependency
/// is unhealthy" (`CircuitOpen`) versus "this particular call failed".
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The overall deadline elapsed
    Timeout { elapsed: Duration, timeout: Duration },
    /// The named breaker rejected the call without invoking the operation
    CircuitOpen { breaker: String, failure_count: usize, retry_after: Duration },
    /// All retry attempts were exhausted; the last entry of `failures` is the final fault
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "deadline exceeded after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { breaker, failure_count, retry_after } => {
                write!(
                    f,
                    "circuit breaker '{}' open ({} failures, retry in {:?})",
                    breaker, failure_count, retry_after
                )
            }
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "retries exhausted after {} attempts; last error: {}", attempts, last)
                }
                None => {
                    write!(f, "retries exhausted after {} attempts; no recorded failures", attempts)
                }
            },
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> From<E> for ResilienceError<E> {
    fn from(err: E) -> Self {
        ResilienceError::Inner(err)
    }
}

impl<E> ResilienceError<E> {
    /// Construct a `RetryExhausted` variant keeping only the most recent `MAX_RETRY_FAILURES`.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let trimmed = if failures.len() > MAX_RETRY_FAILURES {
            let skip = failures.len() - MAX_RETRY_FAILURES;
            failures.into_iter().skip(skip).collect()
        } else {
            failures
        };
        ResilienceError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Recorded failures for `RetryExhausted`.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    /// The fault that ended the call: the inner error, or the final failure of an exhausted retry.
    pub fn last_failure(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => failures.last(),
            _ => None,
        }
    }

    /// Name of the breaker that rejected the call.
    pub fn circuit_breaker(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { breaker, .. } => Some(breaker),
            _ => None,
        }
    }

    /// Remaining cooldown reported by an open breaker.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Total attempts made, for `RetryExhausted`.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

impl<E: FaultSignals> FaultSignals for ResilienceError<E> {
    fn transport_code(&self) -> Option<TransportCode> {
        self.as_inner().and_then(|e| e.transport_code())
    }

    fn status(&self) -> Option<u16> {
        self.as_inner().and_then(|e| e.status())
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Inner(e) => e.message(),
            Self::Timeout { .. } => Cow::Borrowed("deadline exceeded"),
            Self::CircuitOpen { .. } => Cow::Borrowed("circuit breaker open"),
            Self::RetryExhausted { .. } => Cow::Borrowed("retries exhausted"),
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            Self::Inner(e) => e.is_terminal(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fault;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn circuit_open_display_names_the_breaker() {
        let err: ResilienceError<DummyError> = ResilienceError::CircuitOpen {
            breaker: "object-store".into(),
            failure_count: 5,
            retry_after: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("object-store"));
        assert!(msg.contains("5 failures"));
        assert_eq!(err.circuit_breaker(), Some("object-store"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err =
            ResilienceError::retry_exhausted(3, vec![DummyError("first"), DummyError("last")]);
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.ends_with("last error: last"));
        assert_eq!(err.last_failure(), Some(&DummyError("last")));
        assert_eq!(err.attempts(), Some(3));
    }

    #[test]
    fn retry_exhausted_display_handles_empty_failures() {
        let err: ResilienceError<DummyError> = ResilienceError::retry_exhausted(3, vec![]);
        assert!(err.to_string().contains("no recorded failures"));
        assert!(err.last_failure().is_none());
    }

    #[test]
    fn retry_exhausted_keeps_most_recent_failures() {
        let mut failures: Vec<DummyError> = (0..25).map(|_| DummyError("old")).collect();
        failures.push(DummyError("newest"));
        let err = ResilienceError::retry_exhausted(26, failures);
        let kept = err.failures().unwrap();
        assert_eq!(kept.len(), MAX_RETRY_FAILURES);
        assert_eq!(kept.last(), Some(&DummyError("newest")));
    }

    #[test]
    fn source_points_at_the_underlying_fault() {
        let inner = ResilienceError::Inner(DummyError("x"));
        assert_eq!(inner.source().unwrap().to_string(), "x");

        let exhausted = ResilienceError::retry_exhausted(2, vec![DummyError("a"), DummyError("b")]);
        assert_eq!(exhausted.source().unwrap().to_string(), "b");

        let timeout: ResilienceError<DummyError> = ResilienceError::Timeout {
            elapsed: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.source().is_none());
        assert!(timeout.is_timeout());
        assert!(!timeout.is_circuit_open());
    }

    #[test]
    fn from_wraps_as_inner() {
        let err: ResilienceError<DummyError> = DummyError("wrapped").into();
        assert!(err.is_inner());
        assert_eq!(err.into_inner(), Some(DummyError("wrapped")));
    }

    #[test]
    fn non_inner_variants_are_terminal_signals() {
        let inner: ResilienceError<Fault> = Fault::http(502, "bad gateway").into();
        assert!(!inner.is_terminal());
        assert_eq!(FaultSignals::status(&inner), Some(502));

        let timeout: ResilienceError<Fault> = ResilienceError::Timeout {
            elapsed: Duration::from_millis(5),
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_terminal());
        assert_eq!(timeout.message(), "deadline exceeded");
    }
}
