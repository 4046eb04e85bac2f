//! Failure classification and resilience errors
//! Operations classify their own failures; the wrapper reports them with call-site context

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::circuit_breaker::CircuitState;

/// Transport-level failure categories seen before any response arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    ConnectionReset,
    TimedOut,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::ConnectionReset => "connection_reset",
            TransportErrorKind::TimedOut => "timed_out",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// What kind of failure an attempt produced. The retry policy decides on this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Upstream answered with a non-success status code
    Status(u16),
    /// The request never got a response
    Transport(TransportErrorKind),
    /// The attempt exceeded the per-attempt deadline
    Timeout,
    /// Never worth retrying (bad input, decode errors, ...)
    Permanent,
}

/// Implemented by operation error types so the wrapper can classify them.
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    #[error("Circuit breaker '{label}' is {state}, call rejected")]
    CircuitOpen { label: String, state: CircuitState },

    #[error("Operation '{label}' timed out after {timeout:?} ({attempts} attempt(s))")]
    Timeout {
        label: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("Operation '{label}' failed after {attempts} attempt(s): {source}")]
    Operation {
        label: String,
        attempts: u32,
        retryable: bool,
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E> {
    pub fn label(&self) -> &str {
        match self {
            ResilienceError::CircuitOpen { label, .. }
            | ResilienceError::Timeout { label, .. }
            | ResilienceError::Operation { label, .. } => label,
        }
    }

    /// Number of times the operation was invoked; zero when the breaker refused the call
    pub fn attempts(&self) -> u32 {
        match self {
            ResilienceError::CircuitOpen { .. } => 0,
            ResilienceError::Timeout { attempts, .. }
            | ResilienceError::Operation { attempts, .. } => *attempts,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }

    /// The operation's own error, if the operation produced the final failure
    pub fn into_source(self) -> Option<E> {
        match self {
            ResilienceError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}
