//! Retry executor for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries after the first call; total attempts are `max_retries + 1`.
//! - Only `ResilienceError::Inner(E)` values are eligible for retry; circuit-open, deadline and
//!   exhausted-retry errors are returned immediately.
//! - An `Inner` fault is retried when the retry condition says so. Without an explicit condition
//!   the failure classifier ([`crate::classify::is_retryable`]) decides.
//! - Before every sleep the `on_retry` observer sees `(attempt, &fault, delay)` and a
//!   [`RetryEvent::Attempt`] is emitted.
//! - The sleeper controls how delays are applied (production uses `TokioSleeper`; tests inject
//!   `InstantSleeper`/`TrackingSleeper`).
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use backstop::{Backoff, Fault, Jitter, ResilienceError, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<Fault>::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_millis(10)))
//!     .jitter(Jitter::None)
//!     .build()
//!     .unwrap();
//! let result: Result<(), ResilienceError<Fault>> =
//!     policy.execute(|| async { Err(Fault::http(503, "busy").into()) }).await;
//! assert_eq!(result.unwrap_err().attempts(), Some(3));
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::classify;
use crate::error::MAX_RETRY_FAILURES;
use crate::fault::FaultSignals;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{EventSink, PolicyEvent, RetryEvent};
use crate::{Jitter, ResilienceError};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Retries performed after the first call when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: usize = 3;

type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryObserver<E> = Arc<dyn Fn(usize, &E, Duration) + Send + Sync>;

/// Attempt budget plus delay schedule. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
}

impl RetryConfig {
    pub fn new(max_retries: usize, backoff: Backoff, jitter: Jitter) -> Self {
        Self { max_retries, backoff, jitter }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// `max_retries + 1`.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// Wait before the retry that follows the failed 0-based `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        crate::backoff::delay(attempt, self)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            jitter: Jitter::additive(Duration::from_secs(1)),
        }
    }
}

/// Retry policy combining config, retry condition, observer, sleeper and telemetry sink.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    retry_condition: RetryCondition<E>,
    on_retry: Option<RetryObserver<E>>,
    sleeper: Arc<dyn Sleeper>,
    sink: EventSink,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_condition: self.retry_condition.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("retry_condition", &"<predicate>")
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<observer>"))
            .field("sleeper", &self.sleeper)
            .field("sink", &self.sink)
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: Send + Sync + 'static,
{
    /// Builder whose default retry condition is the failure classifier.
    pub fn builder() -> RetryPolicyBuilder<E>
    where
        E: FaultSignals,
    {
        RetryPolicyBuilder::new()
    }

    /// Policy using `config` and the failure classifier.
    pub fn from_config(config: RetryConfig) -> Self
    where
        E: FaultSignals,
    {
        RetryPolicyBuilder::new().config(config).assemble()
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `fault` would be retried (ignoring the remaining attempt budget).
    pub fn should_retry(&self, fault: &E) -> bool {
        (self.retry_condition)(fault)
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let started = Instant::now();
        let mut failures: VecDeque<E> = VecDeque::new();
        let mut attempt = 0usize;

        loop {
            let fault = match operation().await {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(fault)) => fault,
                // Breaker rejections, deadlines and exhausted inner retries are terminal.
                Err(other) => return Err(other),
            };

            if !(self.retry_condition)(&fault) {
                tracing::debug!(attempt, "retry: non-retryable failure, giving up");
                return Err(ResilienceError::Inner(fault));
            }

            if attempt >= self.config.max_retries {
                let total_attempts = attempt + 1;
                let total_duration = started.elapsed();
                tracing::warn!(
                    attempts = total_attempts,
                    elapsed_ms = total_duration.as_millis() as u64,
                    "retry: attempts exhausted"
                );
                self.sink
                    .emit(PolicyEvent::Retry(RetryEvent::Exhausted {
                        total_attempts,
                        total_duration,
                    }))
                    .await;
                failures.push_back(fault);
                return Err(ResilienceError::retry_exhausted(
                    total_attempts,
                    failures.into_iter().collect(),
                ));
            }

            let delay = self.config.delay(attempt);
            if let Some(observer) = &self.on_retry {
                observer(attempt, &fault, delay);
            }
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retry: backing off");
            self.sink.emit(PolicyEvent::Retry(RetryEvent::Attempt { attempt, delay })).await;

            failures.push_back(fault);
            while failures.len() > MAX_RETRY_FAILURES {
                failures.pop_front();
            }

            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Wrap this policy as a tower layer.
    pub fn into_layer(self) -> RetryLayer<E> {
        RetryLayer { policy: self }
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    config: RetryConfig,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    retry_condition: RetryCondition<E>,
    on_retry: Option<RetryObserver<E>>,
    sleeper: Arc<dyn Sleeper>,
    sink: EventSink,
}

impl<E> RetryPolicyBuilder<E>
where
    E: Send + Sync + 'static,
{
    /// Builder with default config and the failure classifier as retry condition.
    pub fn new() -> Self
    where
        E: FaultSignals,
    {
        Self::with_retry_condition(|fault: &E| classify::is_retryable(fault))
    }

    /// Builder for fault types the classifier does not understand.
    pub fn with_retry_condition<F>(condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            config: RetryConfig::default(),
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            retry_condition: Arc::new(condition),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
            sink: EventSink::null(),
        }
    }

    /// Replace the whole config.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Retries after the first call.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Replace the backoff schedule.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Override the attempt-0 delay of the current backoff (validated on `build`).
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Override the delay ceiling (validated on `build`).
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Override the growth factor (validated on `build`).
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Override the classifier.
    pub fn retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Observer called with `(attempt, &fault, delay)` before each sleep.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Build the retry policy, validating the delay overrides.
    pub fn build(mut self) -> Result<RetryPolicy<E>, BuildError> {
        let current = self.config.backoff.clone();
        let initial = self.initial_delay.unwrap_or(current.initial());
        let max = self.max_delay.unwrap_or_else(|| current.max().max(initial));
        let multiplier = self.multiplier.unwrap_or(current.multiplier());
        self.config.backoff =
            Backoff::exponential(initial).with_max(max)?.with_multiplier(multiplier)?;
        Ok(self.assemble())
    }

    fn assemble(self) -> RetryPolicy<E> {
        RetryPolicy {
            config: self.config,
            retry_condition: self.retry_condition,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
            sink: self.sink,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: FaultSignals + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Tower layer running the inner service under a [`RetryPolicy`].
pub struct RetryLayer<E> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone() }
    }
}

impl<E> RetryLayer<E> {
    pub fn new(policy: RetryPolicy<E>) -> Self {
        Self { policy }
    }
}

impl<S, E> Layer<S> for RetryLayer<E> {
    type Service = RetryService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`. Each attempt drives a fresh clone of the inner
/// service to readiness before calling it.
pub struct RetryService<S, E> {
    inner: S,
    policy: RetryPolicy<E>,
}

impl<S: Clone, E> Clone for RetryService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone() }
    }
}

impl<S, E, Request> Service<Request> for RetryService<S, E>
where
    Request: Clone + Send + Sync + 'static,
    S: Service<Request> + Clone + Send + Sync + 'static,
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
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(|| {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { svc.oneshot(req).await.map_err(Into::into) }
                })
                .await
        })
    }
}
