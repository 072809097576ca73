//! Settings for the four dependency families the resilience layer guards.
//!
//! Each preset is a plain [`ResilienceSettings`] value, so callers can tweak fields before
//! building a stack, or serialize it as a starting point for a config file.
//!
//! ```rust
//! use backstop::circuit_breaker_registry::InMemoryCircuitBreakerRegistry;
//! use backstop::{presets, Fault, ResilienceStack};
//!
//! let registry = InMemoryCircuitBreakerRegistry::new();
//! let stack: ResilienceStack<Fault> = presets::completion_api()
//!     .build_stack(presets::COMPLETION_API, &registry)
//!     .unwrap();
//! assert!(stack.circuit_breaker().is_some());
//! ```
//!
//! | Preset | Retries | Initial / max delay | Jitter | Breaker (failures / cooldown / successes) |
//! |---|---|---|---|---|
//! | [`completion_api`] | 3 | 1s / 10s | 1s | 5 / 60s / 2 |
//! | [`catalog_service`] | 3 | 500ms / 5s | 500ms | 5 / 30s / 1 |
//! | [`document_parser`] | 2 | 2s / 10s | 1s | 3 / 60s / 1 |
//! | [`object_store`] | 3 | 200ms / 2s | 200ms | 5 / 30s / 2 |

use crate::config::{CircuitBreakerSettings, ResilienceSettings, RetrySettings};
use crate::stack::Composition;

pub const COMPLETION_API: &str = "completion-api";
pub const CATALOG_SERVICE: &str = "catalog-service";
pub const DOCUMENT_PARSER: &str = "document-parser";
pub const OBJECT_STORE: &str = "object-store";

fn preset(retry: RetrySettings, circuit_breaker: CircuitBreakerSettings) -> ResilienceSettings {
    ResilienceSettings {
        retry,
        circuit_breaker,
        composition: Composition::RetryAroundBreaker,
        deadline_ms: None,
    }
}

/// Completion-generation API: slow, rate limited, expensive to hammer.
pub fn completion_api() -> ResilienceSettings {
    preset(
        RetrySettings {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range_ms: 1_000,
        },
        CircuitBreakerSettings {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 2,
            half_open_max_calls: 1,
        },
    )
}

/// Third-party catalog/ordering service.
pub fn catalog_service() -> ResilienceSettings {
    preset(
        RetrySettings {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range_ms: 500,
        },
        CircuitBreakerSettings {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            success_threshold: 1,
            half_open_max_calls: 1,
        },
    )
}

/// Document-parsing service. Parses are heavy, so fewer retries and an earlier trip.
pub fn document_parser() -> ResilienceSettings {
    preset(
        RetrySettings {
            max_retries: 2,
            initial_delay_ms: 2_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range_ms: 1_000,
        },
        CircuitBreakerSettings {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
            success_threshold: 1,
            half_open_max_calls: 1,
        },
    )
}

/// Binary object store.
pub fn object_store() -> ResilienceSettings {
    preset(
        RetrySettings {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range_ms: 200,
        },
        CircuitBreakerSettings {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            success_threshold: 2,
            half_open_max_calls: 1,
        },
    )
}

/// Preset registered under `name`, if any.
pub fn by_name(name: &str) -> Option<ResilienceSettings> {
    match name {
        COMPLETION_API => Some(completion_api()),
        CATALOG_SERVICE => Some(catalog_service()),
        DOCUMENT_PARSER => Some(document_parser()),
        OBJECT_STORE => Some(object_store()),
        _ => None,
    }
}

/// Every preset with its dependency name.
pub fn all() -> Vec<(&'static str, ResilienceSettings)> {
    vec![
        (COMPLETION_API, completion_api()),
        (CATALOG_SERVICE, catalog_service()),
        (DOCUMENT_PARSER, document_parser()),
        (OBJECT_STORE, object_store()),
    ]
}
