use backstop::{
    AttemptTracker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Composition, Fault,
    InMemoryCircuitBreakerRegistry, InstantSleeper, Jitter, ManualClock, ResilienceError,
    ResilienceStack, RetryPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);
impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn counted_call(
    counter: &Arc<AtomicUsize>,
    outcome: Result<u32, u16>,
) -> impl FnMut() -> futures::future::BoxFuture<'static, Result<u32, ResilienceError<Fault>>> {
    let counter = counter.clone();
    move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            outcome.map_err(|status| ResilienceError::Inner(Fault::http(status, "upstream")))
        })
    }
}

#[tokio::test]
async fn breaker_lifecycle_through_the_registry() {
    let clock = ManualClock::new();
    let registry = InMemoryCircuitBreakerRegistry::new().with_clock(clock.clone());
    let config = CircuitBreakerConfig::new(3, Duration::from_secs(30), 2).unwrap();
    let breaker = registry.get_or_create("catalog-service", config.clone());
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let err = breaker.execute(counted_call(&counter, Err(502))).await.unwrap_err();
        assert!(err.is_inner());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = breaker.execute(counted_call(&counter, Ok(1))).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(err.circuit_breaker(), Some("catalog-service"));
    assert_eq!(counter.load(Ordering::SeqCst), 3, "open breaker must not invoke the operation");

    clock.advance(30_000);
    let other_handle = registry.get_or_create("catalog-service", config);
    assert_eq!(other_handle.execute(counted_call(&counter, Ok(1))).await.unwrap(), 1);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(other_handle.execute(counted_call(&counter, Ok(2))).await.unwrap(), 2);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn single_half_open_failure_reopens() {
    let clock = ManualClock::new();
    let registry = InMemoryCircuitBreakerRegistry::new().with_clock(clock.clone());
    let config = CircuitBreakerConfig::new(1, Duration::from_secs(5), 3).unwrap();
    let breaker = registry.get_or_create("document-parser", config);
    let counter = Arc::new(AtomicUsize::new(0));

    breaker.execute(counted_call(&counter, Err(500))).await.unwrap_err();
    clock.advance(5_000);
    breaker.execute(counted_call(&counter, Ok(1))).await.unwrap();
    breaker.execute(counted_call(&counter, Ok(1))).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.execute(counted_call(&counter, Err(503))).await.unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.execute(counted_call(&counter, Ok(1))).await.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn admin_reset_and_snapshot() {
    let registry = InMemoryCircuitBreakerRegistry::new();
    let config = CircuitBreakerConfig::new(1, Duration::from_secs(60), 1).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for name in ["object-store", "completion-api"] {
        let breaker = registry.get_or_create(name, config.clone());
        breaker.execute(counted_call(&counter, Err(503))).await.unwrap_err();
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].name, "completion-api");
    assert!(snapshot.iter().all(|s| s.state == CircuitState::Open && s.open_for.is_some()));

    registry.reset("object-store").unwrap();
    let states: Vec<CircuitState> = registry.snapshot().iter().map(|s| s.state).collect();
    assert_eq!(states, vec![CircuitState::Open, CircuitState::Closed]);
    assert!(registry.reset("search").is_err());
}

#[tokio::test]
async fn open_transition_is_logged_with_breaker_name() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .without_time()
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let registry = InMemoryCircuitBreakerRegistry::new();
    let config = CircuitBreakerConfig::new(1, Duration::from_secs(1), 1).unwrap();
    let breaker = registry.get_or_create("object-store", config);
    let counter = Arc::new(AtomicUsize::new(0));
    breaker.execute(counted_call(&counter, Err(500))).await.unwrap_err();

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("circuit breaker → open"), "logs: {logs}");
    assert!(logs.contains("object-store"));
    assert!(logs.contains("ERROR"));
}

#[tokio::test]
async fn stack_retries_through_shared_breaker_and_tracker_records_history() {
    let registry = InMemoryCircuitBreakerRegistry::new();
    let config = CircuitBreakerConfig::new(2, Duration::from_secs(60), 1).unwrap();
    let breaker = registry.get_or_create("completion-api", config);
    let tracker: AttemptTracker<Fault> = AttemptTracker::new();
    let retry = RetryPolicy::<Fault>::builder()
        .max_retries(4)
        .jitter(Jitter::None)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let stack = ResilienceStack::builder()
        .retry(retry)
        .circuit_breaker(breaker.clone())
        .composition(Composition::RetryAroundBreaker)
        .build();

    let tracker_clone = tracker.clone();
    let err = stack
        .execute(move || {
            let tracker = tracker_clone.clone();
            async move {
                tracker.record_attempt("job-1");
                let fault = Fault::http(503, "overloaded");
                tracker.record_failure("job-1", fault.clone());
                Err::<(), _>(ResilienceError::Inner(fault))
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert_eq!(tracker.attempts("job-1"), 2);
    assert_eq!(tracker.failures("job-1").len(), 2);
    assert_eq!(registry.get("completion-api").unwrap().state(), CircuitState::Open);

    tracker.record_attempt("job-2");
    tracker.reset("job-1");
    assert_eq!(tracker.attempts("job-1"), 0);
    assert!(tracker.failures("job-1").is_empty());
    assert_eq!(tracker.attempts("job-2"), 1);
}
