use std::{fmt, io, time::Duration};

use comms::msg::{Fault, FaultKind};

/// All errors that can occur in a session.
#[derive(Debug)]
pub enum SessionError {
    /// The node is unreachable or the connection dropped mid-call.
    Connection(io::Error),
    /// Malformed configuration or request, caught before anything is created.
    Validation(String),
    /// A referenced path or key does not exist.
    NotFound(String),
    /// The operation does not fit the state of a handle or the session.
    State(String),
    /// The node did not answer within the configured duration.
    Timeout(Duration),
    /// The node failed internally while serving the request.
    Remote(String),
    /// The node answered with something the client did not ask for.
    Protocol(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::State(msg) => write!(f, "illegal state: {msg}"),
            Self::Timeout(limit) => write!(f, "no answer within {limit:?}"),
            Self::Remote(msg) => write!(f, "node error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        Self::Connection(e)
    }
}

impl From<Fault> for SessionError {
    fn from(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::NotFound => Self::NotFound(fault.detail),
            FaultKind::Invalid => Self::Validation(fault.detail),
            FaultKind::State => Self::State(fault.detail),
            FaultKind::Internal => Self::Remote(fault.detail),
        }
    }
}
