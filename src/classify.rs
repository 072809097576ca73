//! Failure classifier: decides whether a fault is transient and worth retrying.
//!
//! Decision order (first match wins):
//! 1. terminal faults (cancellation, deadline, breaker rejection) are never retried
//! 2. connection-level transport codes are retried
//! 3. a timeout code is retried; without any structured status, a message mentioning
//!    timeouts, connections or the network is treated the same way
//! 4. status 429 and 500..=599 are retried
//! 5. other 4xx statuses are permanent
//! 6. anything unrecognized is permanent, so programming errors never masquerade as transient
//!
//! The classifier never fails; it always produces a verdict.

use crate::fault::FaultSignals;

const TRANSIENT_VOCABULARY: &[&str] = &["timeout", "timed out", "connection", "network"];

/// Taxonomy produced by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// Connection refused/reset, host not found, timeouts.
    TransientNetwork,
    /// Rate limiting (429) or a 5xx from the dependency.
    TransientService,
    /// Other 4xx, or nothing recognizable.
    PermanentRequest,
    /// Cancelled, deadline exceeded, or rejected by a breaker.
    Terminal,
}

impl FaultClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaultClass::TransientNetwork | FaultClass::TransientService)
    }
}

/// Classify a fault into the failure taxonomy.
pub fn classify<F>(fault: &F) -> FaultClass
where
    F: FaultSignals + ?Sized,
{
    if fault.is_terminal() {
        return FaultClass::Terminal;
    }

    let code = fault.transport_code();
    if code.is_some_and(|code| code.is_connection()) {
        return FaultClass::TransientNetwork;
    }

    let status = fault.status();
    let timed_out = code.is_some_and(|code| code.is_timeout());
    if timed_out || (status.is_none() && mentions_transient_vocabulary(&fault.message())) {
        return FaultClass::TransientNetwork;
    }

    match status {
        Some(429) | Some(500..=599) => FaultClass::TransientService,
        _ => FaultClass::PermanentRequest,
    }
}

/// Whether a fault is transient and worth retrying.
pub fn is_retryable<F>(fault: &F) -> bool
where
    F: FaultSignals + ?Sized,
{
    classify(fault).is_retryable()
}

fn mentions_transient_vocabulary(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSIENT_VOCABULARY.iter().any(|word| lowered.contains(word))
}
