#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # backstop
//!
//! Resilience layer for calls to unreliable external dependencies: retry with exponential
//! backoff, per-dependency circuit breakers, and a structured failure taxonomy.
//!
//! ## Features
//!
//! - **Delay calculator**: exponential growth, capped, with optional additive jitter
//! - **Failure classifier**: transport codes and HTTP-style statuses decide what is transient
//! - **Retry executor** with an `on_retry` observer and injectable sleeper
//! - **Circuit breakers** with a success threshold for half-open recovery
//! - **Breaker registry** shared across the process, with reset and snapshot admin operations
//! - **Attempt tracker** for keyed attempt counts and failure history
//! - **Composition** of retry and breaker in either order, with an optional overall deadline
//! - **Tower layers** for the retry executor and the breaker
//!
//! ## Quick Start
//!
//! ```rust
//! use backstop::{Backoff, Fault, Jitter, ResilienceError, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RetryPolicy::<Fault>::builder()
//!         .max_retries(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(10)))
//!         .jitter(Jitter::additive(Duration::from_millis(5)))
//!         .build()
//!         .unwrap();
//!
//!     let result = policy
//!         .execute(|| async {
//!             // Your call to the dependency here
//!             Ok::<_, ResilienceError<Fault>>(())
//!         })
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod attempts;
pub mod backoff;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod fault;
pub mod jitter;
pub mod prelude;
pub mod presets;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use attempts::AttemptTracker;
pub use backoff::{Backoff, BackoffError};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerLayer, CircuitState,
};
pub use circuit_breaker_registry::{
    CircuitBreakerRegistry, CircuitBreakerRegistryError, InMemoryCircuitBreakerRegistry,
};
pub use classify::{classify, is_retryable, FaultClass};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CircuitBreakerSettings, ConfigError, ResilienceSettings, RetrySettings};
pub use error::ResilienceError;
pub use fault::{Fault, FaultSignals, TransportCode};
pub use jitter::Jitter;
pub use retry::{BuildError, RetryConfig, RetryLayer, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{Composition, ResilienceStack, ResilienceStackBuilder};
pub use timeout::{TimeoutError, TimeoutPolicy};
