//! Convenient re-exports for guarding a dependency call.
pub use crate::{
    circuit_breaker_registry::{CircuitBreakerRegistry, InMemoryCircuitBreakerRegistry},
    classify::{is_retryable, FaultClass},
    fault::{Fault, FaultSignals, TransportCode},
    telemetry::{EventSink, LogSink, MemorySink, PolicyEvent},
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, Composition, Jitter,
    ResilienceError, ResilienceSettings, ResilienceStack, RetryPolicy,
};
