//! A single process compute node: stores frames, fits and scores models for remote sessions.

pub mod config;
pub mod error;
pub mod estimator;
pub mod frames;
pub mod handler;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod server;
pub mod store;

pub use config::NodeConfig;
pub use error::{NodeErr, Result};
pub use server::Node;
