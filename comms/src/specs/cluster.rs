use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The resources a client asks for when it connects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub nthreads: Option<NonZeroUsize>,
    pub max_mem: Option<u64>,
}

/// What the node reports back about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub version: String,
    pub nthreads: NonZeroUsize,
    /// Memory budget for frames in bytes, `None` means unbounded.
    pub max_mem: Option<u64>,
    pub frames: usize,
    pub models: usize,
}
