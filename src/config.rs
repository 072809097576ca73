//! Serializable settings for retry, breaker and deadline policies.
//!
//! Settings use plain millisecond integers so they can live in any serde format (JSON, TOML,
//! environment-derived maps). Every field has a default; conversion into runtime configs
//! validates the values and reports a [`ConfigError`].
//!
//! ```rust
//! use backstop::config::RetrySettings;
//! use backstop::RetryConfig;
//! use std::time::Duration;
//!
//! let settings =
//!     RetrySettings { max_retries: 2, initial_delay_ms: 250, ..RetrySettings::default() };
//! let config = RetryConfig::try_from(&settings).unwrap();
//! assert_eq!(config.max_retries(), 2);
//! assert_eq!(config.backoff().initial(), Duration::from_millis(250));
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::fault::FaultSignals;
use crate::stack::{Composition, ResilienceStack};
use crate::timeout::{TimeoutError, TimeoutPolicy};
use crate::{Jitter, RetryConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors raised while turning settings into runtime policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid retry settings: {0}")]
    Backoff(#[from] BackoffError),
    #[error("invalid circuit breaker settings: {0}")]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error("invalid deadline: {0}")]
    Deadline(#[from] TimeoutError),
}

/// Retry settings; defaults match [`RetryConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub jitter_range_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range_ms: 1_000,
        }
    }
}

impl TryFrom<&RetrySettings> for RetryConfig {
    type Error = ConfigError;

    fn try_from(settings: &RetrySettings) -> Result<Self, Self::Error> {
        let backoff = Backoff::exponential(Duration::from_millis(settings.initial_delay_ms))
            .with_max(Duration::from_millis(settings.max_delay_ms))?
            .with_multiplier(settings.backoff_multiplier)?;
        let jitter = if settings.jitter {
            Jitter::additive(Duration::from_millis(settings.jitter_range_ms))
        } else {
            Jitter::None
        };
        Ok(RetryConfig::new(settings.max_retries, backoff, jitter))
    }
}

/// Breaker settings; defaults match [`CircuitBreakerConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    pub recovery_timeout_ms: u64,
    pub success_threshold: usize,
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

impl TryFrom<&CircuitBreakerSettings> for CircuitBreakerConfig {
    type Error = ConfigError;

    fn try_from(settings: &CircuitBreakerSettings) -> Result<Self, Self::Error> {
        let config = CircuitBreakerConfig::new(
            settings.failure_threshold,
            Duration::from_millis(settings.recovery_timeout_ms),
            settings.success_threshold,
        )?
        .with_half_open_limit(settings.half_open_max_calls)?;
        Ok(config)
    }
}

/// Everything needed to guard one dependency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub composition: Composition,
    /// Overall deadline; `None` leaves the call unbounded.
    pub deadline_ms: Option<u64>,
}

impl ResilienceSettings {
    pub fn retry_config(&self) -> Result<RetryConfig, ConfigError> {
        RetryConfig::try_from(&self.retry)
    }

    pub fn circuit_breaker_config(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        CircuitBreakerConfig::try_from(&self.circuit_breaker)
    }

    pub fn deadline(&self) -> Result<Option<TimeoutPolicy>, ConfigError> {
        self.deadline_ms
            .map(|ms| TimeoutPolicy::new(Duration::from_millis(ms)))
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Validate every section without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_config()?;
        self.circuit_breaker_config()?;
        self.deadline()?;
        Ok(())
    }

    /// Build a stack for `name`, sharing the registry's breaker for that name.
    pub fn build_stack<E>(
        &self,
        name: &str,
        registry: &dyn CircuitBreakerRegistry,
    ) -> Result<ResilienceStack<E>, ConfigError>
    where
        E: FaultSignals + Send + Sync + 'static,
    {
        let retry = RetryPolicy::from_config(self.retry_config()?);
        let breaker = registry.get_or_create(name, self.circuit_breaker_config()?);
        let mut builder = ResilienceStack::builder()
            .retry(retry)
            .circuit_breaker(breaker)
            .composition(self.composition);
        if let Some(deadline) = self.deadline()? {
            builder = builder.deadline(deadline);
        }
        Ok(builder.build())
    }
}
