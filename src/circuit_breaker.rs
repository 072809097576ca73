//! Per-dependency circuit breaker.
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open rejects every call with
//! [`ResilienceError::CircuitOpen`] until `recovery_timeout` has elapsed; the next call then
//! moves the breaker to HalfOpen and runs as a probe. HalfOpen closes after `success_threshold`
//! consecutive probe successes and reopens on any probe failure.
//!
//! All counters live in one mutex-guarded core. The lock is held only for the synchronous
//! admission and outcome bookkeeping, never across the wrapped future. Every state change bumps
//! a generation counter; an outcome reported for a call admitted under an older generation is
//! discarded.
//!
//! ```rust
//! use backstop::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Fault, ResilienceError};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = CircuitBreakerConfig::new(1, Duration::from_secs(30), 1).unwrap();
//! let breaker = CircuitBreaker::new("object-store", config);
//!
//! let _ = breaker
//!     .execute(|| async { Err::<(), _>(ResilienceError::Inner(Fault::http(503, "down"))) })
//!     .await;
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! let rejected = breaker.execute(|| async { Ok::<_, ResilienceError<Fault>>(()) }).await;
//! assert_eq!(rejected.unwrap_err().circuit_breaker(), Some("object-store"));
//! # });
//! ```

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{CircuitBreakerEvent, EventSink, PolicyEvent};
use crate::ResilienceError;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the recovery timeout elapses.
    Open,
    /// Probe mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("recovery_timeout must be > 0 unless breaker is disabled (got {0:?})")]
    InvalidRecoveryTimeout(Duration),
    #[error("success_threshold must be > 0 (got {provided})")]
    InvalidSuccessThreshold { provided: usize },
    #[error("half_open_max_calls must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    success_threshold: usize,
    half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    /// Create a config with validation. Allows a single concurrent probe.
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
        success_threshold: usize,
    ) -> Result<Self, CircuitBreakerError> {
        let config =
            Self { failure_threshold, recovery_timeout, success_threshold, half_open_max_calls: 1 };
        config.validate()?;
        Ok(config)
    }

    /// Breaker that never opens (`failure_threshold` of `usize::MAX`).
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::MAX,
            success_threshold: 1,
            half_open_max_calls: usize::MAX,
        }
    }

    /// Override the maximum number of concurrent half-open probes; must be > 0.
    pub fn with_half_open_limit(mut self, limit: usize) -> Result<Self, CircuitBreakerError> {
        if limit == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: limit });
        }
        self.half_open_max_calls = limit;
        Ok(self)
    }

    fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if self.success_threshold == 0 {
            return Err(CircuitBreakerError::InvalidSuccessThreshold { provided: 0 });
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        let disabled = self.failure_threshold == usize::MAX;
        if self.recovery_timeout.is_zero() && !disabled {
            return Err(CircuitBreakerError::InvalidRecoveryTimeout(self.recovery_timeout));
        }
        Ok(())
    }

    /// Consecutive failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Time to stay Open before admitting a probe.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Consecutive probe successes needed to close from HalfOpen.
    pub fn success_threshold(&self) -> usize {
        self.success_threshold
    }

    /// Maximum concurrent calls while HalfOpen.
    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

impl Default for CircuitBreakerConfig {
    /// 5 failures, 60s cooldown, 1 probe success, 1 concurrent probe.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at_millis: u64,
    half_open_in_flight: usize,
    generation: u64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at_millis: 0,
            half_open_in_flight: 0,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        self.half_open_in_flight = 0;
    }
}

fn lock_core(core: &Mutex<BreakerCore>) -> MutexGuard<'_, BreakerCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    probe: bool,
}

enum Admission {
    Admitted(Permit),
    Rejected { failure_count: usize, retry_after: Duration },
}

/// Releases a half-open probe slot if the probe future is dropped or panics before its outcome
/// is recorded.
struct ProbeGuard<'a> {
    core: &'a Mutex<BreakerCore>,
    generation: u64,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut core = lock_core(self.core);
        if core.generation == self.generation && core.state == CircuitState::HalfOpen {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Point-in-time view of a breaker, for admin endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub half_open_in_flight: usize,
    /// Time since the breaker last opened; `None` while Closed.
    pub open_for: Option<Duration>,
}

/// Circuit breaker guarding calls to one named dependency.
///
/// Clones share the same state, so every handle observes and affects the same lifecycle.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    core: Arc<Mutex<BreakerCore>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: EventSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a Closed breaker using the monotonic clock and no telemetry.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            core: Arc::new(Mutex::new(BreakerCore::new())),
            config,
            clock: Arc::new(MonotonicClock::default()),
            sink: EventSink::null(),
        }
    }

    /// Override the clock (deterministic tests).
    ///
    /// ```
    /// # use backstop::{CircuitBreaker, CircuitBreakerConfig};
    /// #[derive(Debug)]
    /// struct FrozenClock;
    /// impl backstop::Clock for FrozenClock { fn now_millis(&self) -> u64 { 0 } }
    /// let breaker = CircuitBreaker::new("catalog", CircuitBreakerConfig::default())
    ///     .with_clock(FrozenClock);
    /// ```
    pub fn with_clock<C: Clock + 'static>(self, clock: C) -> Self {
        self.with_shared_clock(Arc::new(clock))
    }

    pub fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        lock_core(&self.core).state
    }

    /// Whether both handles drive the same underlying breaker.
    pub fn shares_state_with(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Consecutive failures recorded in the current cycle.
    pub fn failure_count(&self) -> usize {
        lock_core(&self.core).consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = lock_core(&self.core);
        let open_for = match core.state {
            CircuitState::Closed => None,
            _ => Some(Duration::from_millis(
                self.clock.now_millis().saturating_sub(core.opened_at_millis),
            )),
        };
        BreakerSnapshot {
            name: self.name.to_string(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            consecutive_successes: core.consecutive_successes,
            half_open_in_flight: core.half_open_in_flight,
            open_for,
        }
    }

    /// Force the breaker Closed with zero counters, from any state. In-flight calls admitted
    /// before the reset no longer affect the counters.
    pub fn reset(&self) {
        let mut core = lock_core(&self.core);
        let previous = core.state;
        core.transition(CircuitState::Closed);
        core.consecutive_failures = 0;
        core.consecutive_successes = 0;
        core.opened_at_millis = 0;
        tracing::info!(breaker = %self.name, from = %previous, "circuit breaker reset → closed");
    }

    /// Executes the provided async operation under circuit breaker protection.
    ///
    /// # Behavior
    /// - **Closed**: runs the operation; consecutive failures trip the breaker at the threshold.
    /// - **Open**: rejects with `ResilienceError::CircuitOpen` until `recovery_timeout` elapses,
    ///   then admits the next call as a HalfOpen probe.
    /// - **HalfOpen**: admits up to `half_open_max_calls` concurrent probes. `success_threshold`
    ///   consecutive successes close the circuit; any failure reopens it.
    ///
    /// Every `Err` returned by the operation counts as a failure. The breaker never retries.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let (admission, transition) = self.admit();
        self.publish(transition).await;

        let permit = match admission {
            Admission::Admitted(permit) => permit,
            Admission::Rejected { failure_count, retry_after } => {
                tracing::debug!(
                    breaker = %self.name,
                    failure_count,
                    retry_after_ms = as_millis(retry_after),
                    "circuit breaker: call rejected"
                );
                self.publish(Some(CircuitBreakerEvent::Rejected {
                    breaker: self.name.to_string(),
                }))
                .await;
                return Err(ResilienceError::CircuitOpen {
                    breaker: self.name.to_string(),
                    failure_count,
                    retry_after,
                });
            }
        };

        let mut guard =
            ProbeGuard { core: &self.core, generation: permit.generation, armed: permit.probe };
        let result = operation().await;
        guard.disarm();
        drop(guard);

        let transition = self.record(permit, result.is_ok());
        self.publish(transition).await;
        result
    }

    fn admit(&self) -> (Admission, Option<CircuitBreakerEvent>) {
        let mut core = lock_core(&self.core);
        let mut transition = None;

        if core.state == CircuitState::Open {
            let elapsed = self.clock.now_millis().saturating_sub(core.opened_at_millis);
            let cooldown = as_millis(self.config.recovery_timeout);
            if elapsed < cooldown {
                return (
                    Admission::Rejected {
                        failure_count: core.consecutive_failures,
                        retry_after: Duration::from_millis(cooldown - elapsed),
                    },
                    None,
                );
            }
            core.transition(CircuitState::HalfOpen);
            core.consecutive_successes = 0;
            tracing::info!(breaker = %self.name, "circuit breaker → half-open");
            transition = Some(CircuitBreakerEvent::HalfOpen { breaker: self.name.to_string() });
        }

        if core.state == CircuitState::HalfOpen {
            if core.half_open_in_flight >= self.config.half_open_max_calls {
                return (
                    Admission::Rejected {
                        failure_count: core.consecutive_failures,
                        retry_after: Duration::ZERO,
                    },
                    transition,
                );
            }
            core.half_open_in_flight += 1;
            tracing::debug!(
                breaker = %self.name,
                in_flight = core.half_open_in_flight,
                max = self.config.half_open_max_calls,
                "circuit breaker: half-open probe admitted"
            );
            return (
                Admission::Admitted(Permit { generation: core.generation, probe: true }),
                transition,
            );
        }

        (Admission::Admitted(Permit { generation: core.generation, probe: false }), transition)
    }

    fn record(&self, permit: Permit, success: bool) -> Option<CircuitBreakerEvent> {
        let mut core = lock_core(&self.core);
        if core.generation != permit.generation {
            tracing::debug!(
                breaker = %self.name,
                success,
                "circuit breaker: stale outcome ignored"
            );
            return None;
        }
        if permit.probe {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }

        match (core.state, success) {
            (CircuitState::Closed, true) => {
                core.consecutive_failures = 0;
                None
            }
            (CircuitState::Closed, false) => {
                core.consecutive_failures = core.consecutive_failures.saturating_add(1);
                if core.consecutive_failures < self.config.failure_threshold {
                    return None;
                }
                core.transition(CircuitState::Open);
                core.opened_at_millis = self.clock.now_millis();
                tracing::error!(
                    breaker = %self.name,
                    failures = core.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker → open"
                );
                Some(CircuitBreakerEvent::Opened {
                    breaker: self.name.to_string(),
                    failure_count: core.consecutive_failures,
                })
            }
            (CircuitState::HalfOpen, true) => {
                core.consecutive_successes += 1;
                if core.consecutive_successes < self.config.success_threshold {
                    return None;
                }
                core.transition(CircuitState::Closed);
                core.consecutive_failures = 0;
                core.consecutive_successes = 0;
                core.opened_at_millis = 0;
                tracing::info!(breaker = %self.name, "circuit breaker → closed");
                Some(CircuitBreakerEvent::Closed { breaker: self.name.to_string() })
            }
            (CircuitState::HalfOpen, false) => {
                core.transition(CircuitState::Open);
                core.consecutive_successes = 0;
                core.opened_at_millis = self.clock.now_millis();
                tracing::warn!(
                    breaker = %self.name,
                    failures = core.consecutive_failures,
                    "circuit breaker: probe failed → open"
                );
                Some(CircuitBreakerEvent::Opened {
                    breaker: self.name.to_string(),
                    failure_count: core.consecutive_failures,
                })
            }
            (CircuitState::Open, _) => None,
        }
    }

    async fn publish(&self, event: Option<CircuitBreakerEvent>) {
        if let Some(event) = event {
            self.sink.emit(PolicyEvent::CircuitBreaker(event)).await;
        }
    }

    /// Wrap this breaker as a tower layer producing `ResilienceError<E>`.
    pub fn into_layer<E>(self) -> CircuitBreakerLayer<E> {
        CircuitBreakerLayer::new(self)
    }
}

/// Tower layer guarding the inner service with a shared [`CircuitBreaker`]. `E` is the fault
/// type carried by the resulting `ResilienceError<E>`.
pub struct CircuitBreakerLayer<E> {
    breaker: CircuitBreaker,
    _fault: PhantomData<fn() -> E>,
}

impl<E> CircuitBreakerLayer<E> {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker, _fault: PhantomData }
    }
}

impl<E> Clone for CircuitBreakerLayer<E> {
    fn clone(&self) -> Self {
        Self::new(self.breaker.clone())
    }
}

impl<E> fmt::Debug for CircuitBreakerLayer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerLayer").field("breaker", &self.breaker).finish()
    }
}

impl<S, E> Layer<S> for CircuitBreakerLayer<E> {
    type Service = CircuitBreakerService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService { inner: service, breaker: self.breaker.clone(), _fault: PhantomData }
    }
}

/// Service produced by `CircuitBreakerLayer`.
pub struct CircuitBreakerService<S, E> {
    inner: S,
    breaker: CircuitBreaker,
    _fault: PhantomData<fn() -> E>,
}

impl<S, E> CircuitBreakerService<S, E> {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<S: Clone, E> Clone for CircuitBreakerService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), breaker: self.breaker.clone(), _fault: PhantomData }
    }
}

impl<S, Request, E> Service<Request> for CircuitBreakerService<S, E>
where
    Request: Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<ResilienceError<E>> + Send + 'static,
    S::Future: Send + 'static,
    E: Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let breaker = self.breaker.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            breaker
                .execute(move || async move { inner.oneshot(req).await.map_err(Into::into) })
                .await
        })
    }
}
