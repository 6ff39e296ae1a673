pub mod configs;
pub mod error;
pub mod handles;
mod registry;
pub mod search;
mod session;

use std::{net::ToSocketAddrs, num::NonZeroUsize};

pub use comms::specs::{
    frame::{Column, ColumnData, ColumnKind, ColumnMeta, FrameData},
    metrics::{Metric, MetricsSummary},
    model::ProblemKind,
};
pub use error::SessionError;
pub use handles::{Frame, Handle, Model};
pub use search::{Grid, GridModel, HyperParams, Sampler, SearchSpace};
pub use session::{ImportOptions, Session, SessionOptions};

/// Opens a session with the node at `addr`.
///
/// # Arguments
/// * `addr` - The network address of the node.
/// * `nthreads` - The number of threads asked from the node, `None` takes what it has.
/// * `max_mem` - The memory budget asked from the node in bytes, `None` takes what it has.
///
/// # Errors
/// Returns a `SessionError::Connection` if the node is unreachable.
pub fn connect<A: ToSocketAddrs>(
    addr: A,
    nthreads: Option<NonZeroUsize>,
    max_mem: Option<u64>,
) -> Result<Session, SessionError> {
    log::info!("connecting to the node");
    let options = SessionOptions {
        nthreads,
        max_mem,
        timeout: None,
    };
    Session::connect_with(addr, options)
}
