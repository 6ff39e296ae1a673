mod adapter;
mod deep_learning;
mod job;
mod value;

pub use adapter::Adapter;
pub use comms::specs::model::{Activation, StoppingMetric};
pub use deep_learning::DeepLearningConfig;
pub use job::{JobConfig, SearchConfig, SplitConfig};
pub use value::ParamValue;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// The configuration of a fit, one variant per algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum ModelConfig {
    #[serde(rename = "deeplearning")]
    DeepLearning(DeepLearningConfig),
}

impl ModelConfig {
    pub fn algorithm(&self) -> &'static str {
        match self {
            ModelConfig::DeepLearning(_) => "deeplearning",
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        match self {
            ModelConfig::DeepLearning(config) => config.validate(),
        }
    }

    /// Sets the option called `name`, see [`DeepLearningConfig::apply`].
    pub fn apply(&mut self, name: &str, value: &ParamValue) -> Result<(), SessionError> {
        match self {
            ModelConfig::DeepLearning(config) => config.apply(name, value),
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            ModelConfig::DeepLearning(config) => config.model_id.as_deref(),
        }
    }

    pub fn set_model_id(&mut self, model_id: Option<String>) {
        match self {
            ModelConfig::DeepLearning(config) => config.model_id = model_id,
        }
    }

    pub fn checkpoint(&self) -> Option<&str> {
        match self {
            ModelConfig::DeepLearning(config) => config.checkpoint.as_deref(),
        }
    }
}

impl From<DeepLearningConfig> for ModelConfig {
    fn from(config: DeepLearningConfig) -> Self {
        Self::DeepLearning(config)
    }
}
