//! Registry of named circuit breakers.
//!
//! One breaker per dependency name, shared by every caller that asks for that name. The registry
//! is an explicit object built at startup and handed to whoever needs it (service wrappers, admin
//! endpoints), so tests can build their own isolated instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::EventSink;
use tracing::warn;

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerRegistryError {
    #[error("circuit breaker '{name}' not found")]
    NotFound { name: String },
}

/// Name → breaker lookup with admin operations.
pub trait CircuitBreakerRegistry: Send + Sync + fmt::Debug {
    /// Breaker registered under `name`, creating it from `config` on first use. Later calls
    /// return the same shared instance; their config is ignored.
    fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker;
    fn get(&self, name: &str) -> Option<CircuitBreaker>;
    /// Force the named breaker Closed.
    fn reset(&self, name: &str) -> Result<(), CircuitBreakerRegistryError>;
    fn reset_all(&self);
    /// Registered names, sorted.
    fn names(&self) -> Vec<String>;
    /// Snapshots of every breaker, sorted by name.
    fn snapshot(&self) -> Vec<BreakerSnapshot>;
}

/// In-memory implementation backed by an RwLock. Clones share the same map.
#[derive(Clone)]
pub struct InMemoryCircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    clock: Arc<dyn Clock>,
    sink: EventSink,
}

impl Default for InMemoryCircuitBreakerRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            clock: Arc::new(MonotonicClock::default()),
            sink: EventSink::null(),
        }
    }
}

impl fmt::Debug for InMemoryCircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("sink", &self.sink)
            .finish()
    }
}

impl InMemoryCircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock handed to every breaker created afterwards.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Telemetry sink handed to every breaker created afterwards.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Breaker bookkeeping never panics while holding the map lock, so a poisoned map is still
    // consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn warn_on_conflict(existing: &CircuitBreaker, requested: &CircuitBreakerConfig) {
        if existing.config() != requested {
            warn!(
                target: "backstop::circuit_breaker_registry",
                breaker = %existing.name(),
                existing = ?existing.config(),
                requested = ?requested,
                "circuit breaker already registered with a different config; keeping the first"
            );
        }
    }
}

impl CircuitBreakerRegistry for InMemoryCircuitBreakerRegistry {
    fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        if let Some(existing) = self.read().get(name) {
            Self::warn_on_conflict(existing, &config);
            return existing.clone();
        }

        let mut map = self.write();
        if let Some(existing) = map.get(name) {
            Self::warn_on_conflict(existing, &config);
            return existing.clone();
        }
        let breaker = CircuitBreaker::new(name, config)
            .with_shared_clock(self.clock.clone())
            .with_sink(self.sink.clone());
        tracing::debug!(
            target: "backstop::circuit_breaker_registry",
            breaker = %name,
            "circuit breaker registered"
        );
        map.insert(name.to_string(), breaker.clone());
        breaker
    }

    fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.read().get(name).cloned()
    }

    fn reset(&self, name: &str) -> Result<(), CircuitBreakerRegistryError> {
        match self.read().get(name) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(CircuitBreakerRegistryError::NotFound { name: name.to_string() }),
        }
    }

    fn reset_all(&self) {
        for breaker in self.read().values() {
            breaker.reset();
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut entries: Vec<BreakerSnapshot> =
            self.read().values().map(CircuitBreaker::snapshot).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::clock::ManualClock;
    use crate::{Fault, ResilienceError};
    use std::sync::Mutex;
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
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn config(failures: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(failures, Duration::from_secs(30), 1).unwrap()
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().failure_threshold() {
            let _ = breaker
                .execute(|| async { Err::<(), _>(ResilienceError::Inner(Fault::http(503, "x"))) })
                .await;
        }
    }

    #[tokio::test]
    async fn same_name_returns_the_shared_instance() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let first = registry.get_or_create("catalog", config(2));
        let second = registry.get_or_create("catalog", config(2));
        assert!(first.shares_state_with(&second));

        trip(&first).await;
        assert_eq!(second.state(), CircuitState::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_config_warns_and_keeps_the_first() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = InMemoryCircuitBreakerRegistry::new();
        registry.get_or_create("parser", config(3));
        let resolved = registry.get_or_create("parser", config(7));
        assert_eq!(resolved.config().failure_threshold(), 3, "first registration should win");

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("already registered with a different config"),
            "warning should be emitted on conflicting registration"
        );
        assert!(logs.contains("backstop::circuit_breaker_registry"));
    }

    #[tokio::test]
    async fn reset_by_name_and_not_found() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let breaker = registry.get_or_create("object-store", config(1));
        trip(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        registry.reset("object-store").unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert_eq!(
            registry.reset("missing"),
            Err(CircuitBreakerRegistryError::NotFound { name: "missing".into() })
        );
        assert_eq!(
            registry.reset("missing").unwrap_err().to_string(),
            "circuit breaker 'missing' not found"
        );
    }

    #[tokio::test]
    async fn reset_all_and_sorted_views() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        for name in ["object-store", "catalog", "parser"] {
            trip(&registry.get_or_create(name, config(1))).await;
        }
        assert_eq!(registry.names(), vec!["catalog", "object-store", "parser"]);
        assert!(registry.snapshot().iter().all(|s| s.state == CircuitState::Open));

        registry.reset_all();
        let snapshot = registry.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["catalog", "object-store", "parser"]);
        assert!(snapshot.iter().all(|s| s.state == CircuitState::Closed));
        assert!(registry.get("unknown").is_none());
    }

    #[tokio::test]
    async fn created_breakers_use_the_registry_clock() {
        let clock = ManualClock::new();
        let registry = InMemoryCircuitBreakerRegistry::new().with_clock(clock.clone());
        let breaker = registry.get_or_create("completion", config(1));
        trip(&breaker).await;

        clock.advance(30_000);
        let result = breaker.execute(|| async { Ok::<_, ResilienceError<Fault>>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn concurrent_get_or_create_yields_one_instance() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("shared", config(5)))
            })
            .collect();
        let breakers: Vec<CircuitBreaker> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|pair| pair[0].shares_state_with(&pair[1])));
        assert_eq!(registry.names(), vec!["shared"]);
    }
}
