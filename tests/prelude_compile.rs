//! Compile-time prelude coverage test.
use backstop::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let events = MemorySink::new();
    let retry = RetryPolicy::<Fault>::builder()
        .backoff(Backoff::constant(Duration::from_millis(1)))
        .jitter(Jitter::None)
        .with_sink(EventSink::new(events.clone()))
        .build()
        .expect("retry policy");
    let registry = InMemoryCircuitBreakerRegistry::new();
    let breaker = registry.get_or_create("prelude", CircuitBreakerConfig::default());
    let stack = ResilienceStack::builder()
        .retry(retry)
        .circuit_breaker(breaker)
        .composition(Composition::default())
        .build();

    let mut failed_once = false;
    let value = stack
        .execute(move || {
            let fail = !failed_once;
            failed_once = true;
            async move {
                if fail {
                    Err(ResilienceError::Inner(Fault::transport(TransportCode::TimedOut, "slow")))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .expect("second attempt succeeds");

    assert_eq!(value, 42);
    assert!(is_retryable(&Fault::http(503, "unavailable")));
    assert_eq!(registry.get("prelude").map(|b| b.state()), Some(CircuitState::Closed));
    assert!(events.events().iter().any(|e| matches!(e, PolicyEvent::Retry(_))));
    let _ = LogSink;
    let _ = ResilienceSettings::default();
    let _ = FaultClass::TransientNetwork;
}
