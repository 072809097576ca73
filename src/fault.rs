//! Explicit fault type carried by calls to external dependencies.
//!
//! Service wrappers populate a [`Fault`] with whatever structured signal they have: a
//! transport-level code, an HTTP-style status (from one of the conventional locations), and a
//! human-readable message. The classifier in [`crate::classify`] reads these through the
//! [`FaultSignals`] trait, which is also implemented for `std::io::Error` and for
//! [`crate::ResilienceError`].

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

/// Transport-level error codes with conventional names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCode {
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    HostNotFound,
    HostUnreachable,
    NetworkUnreachable,
    TimedOut,
}

impl TransportCode {
    /// Conventional errno-style name, e.g. `ECONNREFUSED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::ConnectionRefused => "ECONNREFUSED",
            TransportCode::ConnectionReset => "ECONNRESET",
            TransportCode::ConnectionAborted => "ECONNABORTED",
            TransportCode::HostNotFound => "ENOTFOUND",
            TransportCode::HostUnreachable => "EHOSTUNREACH",
            TransportCode::NetworkUnreachable => "ENETUNREACH",
            TransportCode::TimedOut => "ETIMEDOUT",
        }
    }

    /// Connection-level failure (everything except a timeout).
    pub fn is_connection(&self) -> bool {
        !self.is_timeout()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportCode::TimedOut)
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognized transport code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport code '{0}'")]
pub struct UnknownTransportCode(pub String);

impl FromStr for TransportCode {
    type Err = UnknownTransportCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ECONNREFUSED" => Ok(TransportCode::ConnectionRefused),
            "ECONNRESET" => Ok(TransportCode::ConnectionReset),
            "ECONNABORTED" => Ok(TransportCode::ConnectionAborted),
            "ENOTFOUND" | "EAI_AGAIN" => Ok(TransportCode::HostNotFound),
            "EHOSTUNREACH" => Ok(TransportCode::HostUnreachable),
            "ENETUNREACH" => Ok(TransportCode::NetworkUnreachable),
            "ETIMEDOUT" | "ESOCKETTIMEDOUT" => Ok(TransportCode::TimedOut),
            _ => Err(UnknownTransportCode(s.to_string())),
        }
    }
}

/// Structured signals a fault can expose to the classifier.
///
/// `status()` resolves the conventional locations in a fixed order: direct status, then the
/// nested response status, then the status-code field.
pub trait FaultSignals {
    fn transport_code(&self) -> Option<TransportCode> {
        None
    }

    fn status(&self) -> Option<u16> {
        None
    }

    fn message(&self) -> Cow<'_, str>;

    /// Faults that must never be retried regardless of other signals (cancellation, deadline,
    /// breaker rejection, exhausted inner retry).
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Failure produced by a call to an external dependency.
#[derive(Debug, Clone, Default)]
pub struct Fault {
    message: String,
    transport: Option<TransportCode>,
    status: Option<u16>,
    response_status: Option<u16>,
    status_code: Option<u16>,
    terminal: bool,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Fault {
    /// Fault carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }

    /// Fault raised by the transport (connection refused, reset, timed out, ...).
    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        Self::new(message).with_transport(code)
    }

    /// Fault with an HTTP-style status returned by the dependency.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    /// Caller-side cancellation or deadline; never retried.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self { terminal: true, ..Self::new(message) }
    }

    pub fn with_transport(mut self, code: TransportCode) -> Self {
        self.transport = Some(code);
        self
    }

    /// Status reported directly on the fault.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Status found on the nested response the fault wraps.
    pub fn with_response_status(mut self, status: u16) -> Self {
        self.response_status = Some(status);
        self
    }

    /// Status reported through a separate status-code field.
    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn transport_code(&self) -> Option<TransportCode> {
        self.transport
    }

    /// First status found, checking direct, response, then status-code.
    pub fn status(&self) -> Option<u16> {
        self.status.or(self.response_status).or(self.status_code)
    }

    pub fn is_cancelled(&self) -> bool {
        self.terminal
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.transport, self.status()) {
            (Some(code), _) => write!(f, "{code}: {}", self.message),
            (None, Some(status)) => write!(f, "status {status}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl FaultSignals for Fault {
    fn transport_code(&self) -> Option<TransportCode> {
        self.transport
    }

    fn status(&self) -> Option<u16> {
        Fault::status(self)
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.message)
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }
}

fn transport_code_for(kind: io::ErrorKind) -> Option<TransportCode> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(TransportCode::ConnectionRefused),
        io::ErrorKind::ConnectionReset => Some(TransportCode::ConnectionReset),
        io::ErrorKind::ConnectionAborted => Some(TransportCode::ConnectionAborted),
        io::ErrorKind::TimedOut => Some(TransportCode::TimedOut),
        _ => None,
    }
}

impl FaultSignals for io::Error {
    fn transport_code(&self) -> Option<TransportCode> {
        transport_code_for(self.kind())
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        let fault = Fault::new(err.to_string());
        let fault = match transport_code_for(err.kind()) {
            Some(code) => fault.with_transport(code),
            None => fault,
        };
        fault.with_source(err)
    }
}
