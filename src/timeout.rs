//! Overall deadline for a guarded call.
//!
//! Nothing in the crate imposes a deadline unless one is asked for. When it elapses the wrapped
//! future is dropped and `ResilienceError::Timeout` is returned; the retry executor treats that
//! error as terminal.

use crate::telemetry::{EventSink, PolicyEvent, TimeoutEvent};
use crate::ResilienceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Rejected deadline values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout duration must be non-zero and finite (got {0:?})")]
    InvalidDuration(Duration),
}

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    sink: EventSink,
}

impl TimeoutPolicy {
    /// Create a deadline policy. Errors if duration is zero or `Duration::MAX`.
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(TimeoutError::InvalidDuration(duration));
        }
        Ok(Self { duration, sink: EventSink::null() })
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(
                    timeout_ms = self.duration.as_millis() as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "deadline exceeded"
                );
                self.sink
                    .emit(PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: self.duration }))
                    .await;
                Err(ResilienceError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}
