use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::resilience::{Classify, FailureClass, TransportErrorKind};

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Invalid upstream response: {0}")]
    Decode(String),
}

impl Classify for UpstreamError {
    fn failure_class(&self) -> FailureClass {
        match self {
            UpstreamError::Status { status, .. } => FailureClass::Status(*status),
            UpstreamError::Transport { kind, .. } => FailureClass::Transport(*kind),
            UpstreamError::Decode(_) => FailureClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::TimedOut
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            // JSON is parsed separately, so these mean the body stream broke off
            match io_error_kind(&err) {
                Some(io::ErrorKind::TimedOut) => TransportErrorKind::TimedOut,
                _ => TransportErrorKind::ConnectionReset,
            }
        } else {
            match io_error_kind(&err) {
                Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe) => {
                    TransportErrorKind::ConnectionReset
                }
                Some(io::ErrorKind::TimedOut) => TransportErrorKind::TimedOut,
                Some(io::ErrorKind::ConnectionRefused) => TransportErrorKind::Connect,
                _ => TransportErrorKind::Other,
            }
        };

        UpstreamError::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// First `io::Error` in the source chain, if any
fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}
