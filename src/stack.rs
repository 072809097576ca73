//! Composition of retry, circuit breaker and an overall deadline.
//!
//! The breaker never retries on its own. A stack decides how the two nest:
//!
//! - [`Composition::RetryAroundBreaker`]: every retry attempt passes through the breaker. Once it
//!   opens, the next attempt fails with `CircuitOpen`, which the executor treats as terminal.
//! - [`Composition::BreakerAroundRetry`]: the whole retry sequence counts as one breaker call, so
//!   only an exhausted (or non-retryable) sequence counts as a failure.
//!
//! An optional deadline wraps everything. Its `Timeout` error is terminal.
//!
//! ```rust
//! use backstop::{
//!     Backoff, CircuitBreaker, CircuitBreakerConfig, Composition, Fault, InstantSleeper, Jitter,
//!     ResilienceError, ResilienceStack, RetryPolicy,
//! };
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let retry = RetryPolicy::<Fault>::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::constant(Duration::from_millis(1)))
//!     .jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let breaker = CircuitBreaker::new("catalog", CircuitBreakerConfig::default());
//! let stack = ResilienceStack::builder()
//!     .retry(retry)
//!     .circuit_breaker(breaker)
//!     .composition(Composition::RetryAroundBreaker)
//!     .build();
//!
//! let value = stack.execute(|| async { Ok::<_, ResilienceError<Fault>>("ok") }).await.unwrap();
//! assert_eq!(value, "ok");
//! # });
//! ```

use crate::{CircuitBreaker, ResilienceError, RetryPolicy, TimeoutPolicy};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

/// How the retry executor and the breaker nest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// Retry is the outer wrapper; each attempt is a breaker-guarded call.
    #[default]
    RetryAroundBreaker,
    /// Breaker is the outer wrapper; one retry sequence is one breaker call.
    BreakerAroundRetry,
}

pub struct ResilienceStack<E> {
    retry: Option<RetryPolicy<E>>,
    breaker: Option<CircuitBreaker>,
    deadline: Option<TimeoutPolicy>,
    composition: Composition,
}

impl<E> Clone for ResilienceStack<E> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            deadline: self.deadline.clone(),
            composition: self.composition,
        }
    }
}

impl<E> std::fmt::Debug for ResilienceStack<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceStack")
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("deadline", &self.deadline)
            .field("composition", &self.composition)
            .finish()
    }
}

// One operation shared by every layer; each layer locks only long enough to create the future.
fn invoke<Fut, Op>(operation: &Mutex<Op>) -> Fut
where
    Op: FnMut() -> Fut,
{
    let mut op = operation.lock().unwrap_or_else(PoisonError::into_inner);
    (*op)()
}

impl<E> ResilienceStack<E>
where
    E: Send + Sync + 'static,
{
    pub fn builder() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    pub fn composition(&self) -> Composition {
        self.composition
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy<E>> {
        self.retry.as_ref()
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let operation = Mutex::new(operation);
        match &self.deadline {
            Some(deadline) => deadline.execute(|| self.run(&operation)).await,
            None => self.run(&operation).await,
        }
    }

    async fn run<T, Fut, Op>(&self, operation: &Mutex<Op>) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        match (&self.retry, &self.breaker) {
            (None, None) => invoke(operation).await,
            (Some(retry), None) => retry.execute(move || invoke(operation)).await,
            (None, Some(breaker)) => breaker.execute(move || invoke(operation)).await,
            (Some(retry), Some(breaker)) => match self.composition {
                Composition::RetryAroundBreaker => {
                    retry.execute(move || breaker.execute(move || invoke(operation))).await
                }
                Composition::BreakerAroundRetry => {
                    breaker.execute(move || retry.execute(move || invoke(operation))).await
                }
            },
        }
    }
}

/// Builder for [`ResilienceStack`]. Every layer is optional; an empty stack just runs the
/// operation once.
pub struct ResilienceStackBuilder<E> {
    retry: Option<RetryPolicy<E>>,
    breaker: Option<CircuitBreaker>,
    deadline: Option<TimeoutPolicy>,
    composition: Composition,
}

impl<E> ResilienceStackBuilder<E>
where
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { retry: None, breaker: None, deadline: None, composition: Composition::default() }
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Guard calls with a breaker, usually one obtained from a registry.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Overall deadline around the whole stack.
    pub fn deadline(mut self, policy: TimeoutPolicy) -> Self {
        self.deadline = Some(policy);
        self
    }

    pub fn composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    pub fn build(self) -> ResilienceStack<E> {
        ResilienceStack {
            retry: self.retry,
            breaker: self.breaker,
            deadline: self.deadline,
            composition: self.composition,
        }
    }
}

impl<E> Default for ResilienceStackBuilder<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
