use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{frame::ColumnMeta, metrics::MetricsSummary};

/// Activation function of the hidden layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    TanhWithDropout,
    Rectifier,
    RectifierWithDropout,
    Maxout,
    MaxoutWithDropout,
}

impl Activation {
    pub fn has_dropout(self) -> bool {
        matches!(
            self,
            Activation::TanhWithDropout
                | Activation::RectifierWithDropout
                | Activation::MaxoutWithDropout
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Tanh => "Tanh",
            Activation::TanhWithDropout => "TanhWithDropout",
            Activation::Rectifier => "Rectifier",
            Activation::RectifierWithDropout => "RectifierWithDropout",
            Activation::Maxout => "Maxout",
            Activation::MaxoutWithDropout => "MaxoutWithDropout",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Activation::Tanh,
            Activation::TanhWithDropout,
            Activation::Rectifier,
            Activation::RectifierWithDropout,
            Activation::Maxout,
            Activation::MaxoutWithDropout,
        ];

        all.into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown activation '{s}'"))
    }
}

/// Metric watched by early stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingMetric {
    #[default]
    Auto,
    Deviance,
    Logloss,
    Mse,
    Rmse,
    Mae,
    Misclassification,
    MeanPerClassError,
}

impl FromStr for StoppingMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let metric = match s.to_ascii_lowercase().as_str() {
            "auto" => StoppingMetric::Auto,
            "deviance" => StoppingMetric::Deviance,
            "logloss" => StoppingMetric::Logloss,
            "mse" => StoppingMetric::Mse,
            "rmse" => StoppingMetric::Rmse,
            "mae" => StoppingMetric::Mae,
            "misclassification" => StoppingMetric::Misclassification,
            "mean_per_class_error" => StoppingMetric::MeanPerClassError,
            _ => return Err(format!("unknown stopping metric '{s}'")),
        };

        Ok(metric)
    }
}

/// The fully resolved parameters of a deep learning fit, as sent to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLearningSpec {
    pub x: Vec<String>,
    pub y: String,
    pub hidden: Vec<usize>,
    pub activation: Activation,
    pub epochs: f64,
    pub l1: f64,
    pub l2: f64,
    pub input_dropout_ratio: f64,
    pub hidden_dropout_ratios: Vec<f64>,
    pub adaptive_rate: bool,
    pub rho: f64,
    pub epsilon: f64,
    pub rate: f64,
    pub rate_annealing: f64,
    pub rate_decay: f64,
    pub momentum_start: f64,
    pub momentum_ramp: f64,
    pub momentum_stable: f64,
    pub nesterov_accelerated_gradient: bool,
    pub stopping_rounds: usize,
    pub stopping_metric: StoppingMetric,
    pub stopping_tolerance: f64,
    pub nfolds: usize,
    pub seed: Option<u64>,
    pub reproducible: bool,
    pub checkpoint: Option<String>,
}

/// Algorithm selection with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmSpec {
    DeepLearning(DeepLearningSpec),
}

impl AlgorithmSpec {
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmSpec::DeepLearning(_) => "deeplearning",
        }
    }

    pub fn features(&self) -> &[String] {
        match self {
            AlgorithmSpec::DeepLearning(spec) => &spec.x,
        }
    }

    pub fn response(&self) -> &str {
        match self {
            AlgorithmSpec::DeepLearning(spec) => &spec.y,
        }
    }

    /// The key of the model to continue training from.
    pub fn checkpoint(&self) -> Option<&str> {
        match self {
            AlgorithmSpec::DeepLearning(spec) => spec.checkpoint.as_deref(),
        }
    }
}

/// A request to fit a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSpec {
    pub model_id: Option<String>,
    pub algorithm: AlgorithmSpec,
    pub training_frame: String,
    pub validation_frame: Option<String>,
}

/// Whether a model predicts a class or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Regression,
    Classification,
}

/// Metadata of a trained model resident on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub key: String,
    pub algorithm: String,
    pub problem: ProblemKind,
    pub params: AlgorithmSpec,
    /// The feature columns the model was trained against.
    pub features: Vec<ColumnMeta>,
    pub response: ColumnMeta,
    pub training_frame: String,
    pub validation_frame: Option<String>,
    pub epochs_trained: f64,
    pub training_metrics: MetricsSummary,
    pub validation_metrics: Option<MetricsSummary>,
    pub cross_validation_metrics: Option<MetricsSummary>,
}

impl ModelMeta {
    /// The response levels for classification models.
    pub fn response_levels(&self) -> &[String] {
        self.response.kind.levels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_parses_case_insensitively() {
        assert_eq!(
            "rectifierwithdropout".parse::<Activation>().unwrap(),
            Activation::RectifierWithDropout
        );
        assert!("Sigmoid".parse::<Activation>().is_err());
    }

    #[test]
    fn dropout_variants() {
        assert!(Activation::MaxoutWithDropout.has_dropout());
        assert!(!Activation::Tanh.has_dropout());
    }

    #[test]
    fn stopping_metric_parses() {
        assert_eq!(
            "MSE".parse::<StoppingMetric>().unwrap(),
            StoppingMetric::Mse
        );
        assert!("auc2".parse::<StoppingMetric>().is_err());
    }
}
