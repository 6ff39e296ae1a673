//! Wire-level types shared by the session client and the cluster node.

pub mod cluster;
pub mod frame;
pub mod metrics;
pub mod model;
