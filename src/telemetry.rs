//! Telemetry for retry, breaker and deadline policies.
//!
//! Policies describe what they do as [`PolicyEvent`]s and hand them to a sink. Sinks are plain
//! `tower::Service<PolicyEvent>` implementations so they compose with standard tower
//! combinators. Delivery is best-effort: a sink that is not ready or errors simply drops the
//! event, so telemetry never changes the outcome of a guarded call.
//!
//! ```rust
//! use backstop::telemetry::{MemorySink, PolicyEvent, RetryEvent};
//! use std::time::Duration;
//!
//! let sink = MemorySink::new();
//! let event =
//!     PolicyEvent::Retry(RetryEvent::Attempt { attempt: 0, delay: Duration::from_secs(1) });
//! assert_eq!(event.to_string(), "Retry::Attempt(#0, delay=1s)");
//! assert!(sink.is_empty());
//! ```

use futures::future::BoxFuture;
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted by the policies in this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    Retry(RetryEvent),
    CircuitBreaker(CircuitBreakerEvent),
    Timeout(TimeoutEvent),
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retryable failure occurred; the policy will sleep `delay` and try again.
    Attempt {
        /// 0-based index of the attempt that failed
        attempt: usize,
        delay: Duration,
    },
    /// The final allowed attempt failed with a retryable fault.
    Exhausted { total_attempts: usize, total_duration: Duration },
}

/// Events emitted by circuit breakers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Breaker tripped (from Closed) or a probe failed (from HalfOpen).
    Opened { breaker: String, failure_count: usize },
    /// Cooldown elapsed; probes are being admitted.
    HalfOpen { breaker: String },
    /// Enough probes succeeded; normal operation resumed.
    Closed { breaker: String },
    /// A call was refused without invoking the operation.
    Rejected { breaker: String },
}

/// Events emitted by deadline policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    Occurred { timeout: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { breaker, failure_count } => {
                write!(f, "Opened({}, failures={})", breaker, failure_count)
            }
            CircuitBreakerEvent::HalfOpen { breaker } => write!(f, "HalfOpen({})", breaker),
            CircuitBreakerEvent::Closed { breaker } => write!(f, "Closed({})", breaker),
            CircuitBreakerEvent::Rejected { breaker } => write!(f, "Rejected({})", breaker),
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

type EmitFn = dyn Fn(PolicyEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased handle to a sink, shared by every clone of a policy.
#[derive(Clone)]
pub struct EventSink {
    emit: Option<Arc<EmitFn>>,
}

impl EventSink {
    /// Wrap any tower sink.
    pub fn new<S>(sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let emit = move |event: PolicyEvent| -> BoxFuture<'static, ()> {
            Box::pin(emit_best_effort(sink.clone(), event))
        };
        Self { emit: Some(Arc::new(emit)) }
    }

    /// Sink that discards everything without allocating.
    pub fn null() -> Self {
        Self { emit: None }
    }

    pub async fn emit(&self, event: PolicyEvent) {
        if let Some(emit) = &self.emit {
            emit(event).await;
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("attached", &self.emit.is_some()).finish()
    }
}

type ReadyFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// A sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

/// A sink that logs every event through `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(target: "backstop::telemetry", event = %event, "policy_event");
        Box::pin(async { Ok(()) })
    }
}

/// A bounded in-memory sink; oldest events are evicted once capacity is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a memory sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn stored(&self) -> MutexGuard<'_, Vec<PolicyEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.stored().clone()
    }

    pub fn clear(&self) {
        self.stored().clear();
    }

    pub fn len(&self) -> usize {
        self.stored().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored().is_empty()
    }

    /// Number of events dropped to respect the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        {
            let mut events = self.stored();
            if events.len() >= self.capacity {
                events.remove(0);
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            events.push(event);
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: usize) -> PolicyEvent {
        PolicyEvent::Retry(RetryEvent::Attempt { attempt: n, delay: Duration::from_millis(10) })
    }

    #[tokio::test]
    async fn memory_sink_records_through_event_sink() {
        let sink = MemorySink::new();
        let handle = EventSink::new(sink.clone());
        handle.emit(attempt(0)).await;
        handle
            .emit(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Closed {
                breaker: "catalog".into(),
            }))
            .await;
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[0], attempt(0));
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        let handle = EventSink::new(sink.clone());
        for n in 0..3 {
            handle.emit(attempt(n)).await;
        }
        assert_eq!(sink.events(), vec![attempt(1), attempt(2)]);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn null_event_sink_is_a_no_op() {
        EventSink::null().emit(attempt(0)).await;
        EventSink::new(NullSink).emit(attempt(1)).await;
    }

    #[test]
    fn events_render_compactly() {
        let opened = PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
            breaker: "parser".into(),
            failure_count: 3,
        });
        assert_eq!(opened.to_string(), "CircuitBreaker::Opened(parser, failures=3)");
        let timeout =
            PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_secs(2) });
        assert_eq!(timeout.to_string(), "Timeout::Occurred(timeout=2s)");
    }
}
