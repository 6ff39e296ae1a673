use std::{error::Error, fmt, io};

use comms::msg::{Fault, FaultKind};

/// The node module's result type.
pub type Result<T> = std::result::Result<T, NodeErr>;

/// Failures while serving a client request.
#[derive(Debug)]
pub enum NodeErr {
    NotFound(String),
    Invalid(String),
    State(String),
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl NodeErr {
    /// The fault category reported back to the client.
    pub fn kind(&self) -> FaultKind {
        match self {
            NodeErr::NotFound(_) => FaultKind::NotFound,
            NodeErr::Invalid(_) | NodeErr::Csv(_) | NodeErr::Json(_) => FaultKind::Invalid,
            NodeErr::State(_) => FaultKind::State,
            NodeErr::Io(e) if e.kind() == io::ErrorKind::NotFound => FaultKind::NotFound,
            NodeErr::Io(_) => FaultKind::Internal,
        }
    }

    /// Builds the wire fault for the request `id`.
    pub fn into_fault(self, id: Option<u64>) -> Fault {
        Fault {
            id,
            kind: self.kind(),
            detail: self.to_string(),
        }
    }
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErr::NotFound(what) => write!(f, "not found: {what}"),
            NodeErr::Invalid(detail) => write!(f, "invalid request: {detail}"),
            NodeErr::State(detail) => write!(f, "illegal state: {detail}"),
            NodeErr::Io(e) => write!(f, "io error: {e}"),
            NodeErr::Csv(e) => write!(f, "csv error: {e}"),
            NodeErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for NodeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeErr::Io(e) => Some(e),
            NodeErr::Csv(e) => Some(e),
            NodeErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NodeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for NodeErr {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_json::Error> for NodeErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
