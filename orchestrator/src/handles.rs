//! Client side references to frames and models resident on the node.

use comms::specs::{
    frame::{ColumnMeta, FrameMeta},
    metrics::MetricsSummary,
    model::{AlgorithmSpec, ModelMeta, ProblemKind},
};

/// Anything that names an object on the node.
pub trait Handle {
    fn key(&self) -> &str;
}

/// A dataset resident on the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    meta: FrameMeta,
}

impl Frame {
    pub(crate) fn new(meta: FrameMeta) -> Self {
        Self { meta }
    }

    pub fn rows(&self) -> usize {
        self.meta.rows
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.meta.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.meta.column(name)
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }
}

impl Handle for Frame {
    fn key(&self) -> &str {
        &self.meta.key
    }
}

/// A trained model resident on the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    meta: ModelMeta,
}

impl Model {
    pub(crate) fn new(meta: ModelMeta) -> Self {
        Self { meta }
    }

    pub fn algorithm(&self) -> &str {
        &self.meta.algorithm
    }

    pub fn problem(&self) -> ProblemKind {
        self.meta.problem
    }

    /// The parameters the model was trained with.
    pub fn params(&self) -> &AlgorithmSpec {
        &self.meta.params
    }

    pub fn epochs_trained(&self) -> f64 {
        self.meta.epochs_trained
    }

    pub fn response_levels(&self) -> &[String] {
        self.meta.response_levels()
    }

    pub fn training_metrics(&self) -> &MetricsSummary {
        &self.meta.training_metrics
    }

    pub fn validation_metrics(&self) -> Option<&MetricsSummary> {
        self.meta.validation_metrics.as_ref()
    }

    pub fn cross_validation_metrics(&self) -> Option<&MetricsSummary> {
        self.meta.cross_validation_metrics.as_ref()
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }
}

impl Handle for Model {
    fn key(&self) -> &str {
        &self.meta.key
    }
}
