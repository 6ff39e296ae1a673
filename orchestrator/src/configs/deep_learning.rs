use comms::specs::model::{Activation, StoppingMetric};
use serde::{Deserialize, Serialize};

use super::ParamValue;
use crate::error::SessionError;

/// Options of a deep learning fit.
///
/// Unset options keep the platform defaults, see [`DeepLearningConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepLearningConfig {
    /// Feature columns.
    pub x: Vec<String>,
    /// Response column, categorical means classification.
    pub y: String,
    /// Key of the resulting model, generated by the node when unset.
    pub model_id: Option<String>,
    pub hidden: Vec<usize>,
    pub activation: Activation,
    pub epochs: f64,
    pub l1: f64,
    pub l2: f64,
    pub input_dropout_ratio: f64,
    /// One ratio per hidden layer, only for dropout activations. Defaults to 0.5 per layer.
    pub hidden_dropout_ratios: Option<Vec<f64>>,
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
    /// Key of a model to continue training from.
    pub checkpoint: Option<String>,
}

impl Default for DeepLearningConfig {
    fn default() -> Self {
        Self {
            x: Vec::new(),
            y: String::new(),
            model_id: None,
            hidden: vec![200, 200],
            activation: Activation::Rectifier,
            epochs: 10.0,
            l1: 0.0,
            l2: 0.0,
            input_dropout_ratio: 0.0,
            hidden_dropout_ratios: None,
            adaptive_rate: true,
            rho: 0.99,
            epsilon: 1e-8,
            rate: 0.005,
            rate_annealing: 1e-6,
            rate_decay: 1.0,
            momentum_start: 0.0,
            momentum_ramp: 1e6,
            momentum_stable: 0.0,
            nesterov_accelerated_gradient: true,
            stopping_rounds: 5,
            stopping_metric: StoppingMetric::Auto,
            stopping_tolerance: 0.0,
            nfolds: 0,
            seed: None,
            reproducible: false,
            checkpoint: None,
        }
    }
}

impl DeepLearningConfig {
    /// A configuration predicting `y` from `x` with default options.
    pub fn new<S: Into<String>>(x: impl IntoIterator<Item = S>, y: impl Into<String>) -> Self {
        Self {
            x: x.into_iter().map(Into::into).collect(),
            y: y.into(),
            ..Default::default()
        }
    }

    /// Checks every option on its own, without looking at any frame.
    ///
    /// # Errors
    /// `SessionError::Validation` describing the first offending option.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.x.is_empty() {
            return invalid("x must name at least one feature column");
        }

        if self.y.is_empty() {
            return invalid("y must name the response column");
        }

        if self.x.contains(&self.y) {
            return invalid(&format!("response '{}' cannot also be a feature", self.y));
        }

        let mut names: Vec<&String> = self.x.iter().collect();
        names.sort();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return invalid(&format!("feature '{}' is listed twice", w[0]));
        }

        if self.hidden.is_empty() || self.hidden.contains(&0) {
            return invalid("hidden must list at least one layer, all of positive size");
        }

        check_range("epochs", self.epochs, 0.0, f64::INFINITY, false)?;
        check_range("l1", self.l1, 0.0, f64::INFINITY, true)?;
        check_range("l2", self.l2, 0.0, f64::INFINITY, true)?;
        check_ratio("input_dropout_ratio", self.input_dropout_ratio)?;

        if let Some(ratios) = &self.hidden_dropout_ratios {
            if !self.activation.has_dropout() {
                return invalid(&format!(
                    "hidden_dropout_ratios needs a dropout activation, got {}",
                    self.activation
                ));
            }

            if ratios.len() != self.hidden.len() {
                return invalid(&format!(
                    "hidden_dropout_ratios has {} entries for {} hidden layers",
                    ratios.len(),
                    self.hidden.len()
                ));
            }

            for ratio in ratios {
                check_ratio("hidden_dropout_ratios", *ratio)?;
            }
        }

        check_ratio("rho", self.rho)?;
        check_range("epsilon", self.epsilon, 0.0, f64::INFINITY, false)?;
        check_range("rate", self.rate, 0.0, f64::INFINITY, false)?;
        check_range("rate_annealing", self.rate_annealing, 0.0, f64::INFINITY, true)?;
        check_range("rate_decay", self.rate_decay, 0.0, f64::INFINITY, false)?;
        check_ratio("momentum_start", self.momentum_start)?;
        check_range("momentum_ramp", self.momentum_ramp, 0.0, f64::INFINITY, false)?;
        check_ratio("momentum_stable", self.momentum_stable)?;
        check_range("stopping_tolerance", self.stopping_tolerance, 0.0, f64::INFINITY, true)?;

        if self.nfolds == 1 {
            return invalid("nfolds must be 0 or at least 2");
        }

        if self.checkpoint.as_deref() == Some("") || self.model_id.as_deref() == Some("") {
            return invalid("checkpoint and model_id must not be empty");
        }

        Ok(())
    }

    /// The hidden dropout ratios sent to the node.
    pub(crate) fn resolved_dropout_ratios(&self) -> Vec<f64> {
        match &self.hidden_dropout_ratios {
            Some(ratios) => ratios.clone(),
            None if self.activation.has_dropout() => vec![0.5; self.hidden.len()],
            None => Vec::new(),
        }
    }

    /// Sets the option called `name`.
    ///
    /// # Errors
    /// `SessionError::Validation` for unknown options or values of the wrong type.
    pub fn apply(&mut self, name: &str, value: &ParamValue) -> Result<(), SessionError> {
        match name {
            "x" => self.x = value.as_str_list(name)?,
            "y" => self.y = value.as_str(name)?.to_string(),
            "model_id" => self.model_id = Some(value.as_str(name)?.to_string()),
            "hidden" => self.hidden = value.as_usize_list(name)?,
            "activation" => {
                self.activation = value
                    .as_str(name)?
                    .parse()
                    .map_err(SessionError::Validation)?;
            }
            "epochs" => self.epochs = value.as_f64(name)?,
            "l1" => self.l1 = value.as_f64(name)?,
            "l2" => self.l2 = value.as_f64(name)?,
            "input_dropout_ratio" => self.input_dropout_ratio = value.as_f64(name)?,
            "hidden_dropout_ratios" => self.hidden_dropout_ratios = Some(value.as_f64_list(name)?),
            "adaptive_rate" => self.adaptive_rate = value.as_bool(name)?,
            "rho" => self.rho = value.as_f64(name)?,
            "epsilon" => self.epsilon = value.as_f64(name)?,
            "rate" => self.rate = value.as_f64(name)?,
            "rate_annealing" => self.rate_annealing = value.as_f64(name)?,
            "rate_decay" => self.rate_decay = value.as_f64(name)?,
            "momentum_start" => self.momentum_start = value.as_f64(name)?,
            "momentum_ramp" => self.momentum_ramp = value.as_f64(name)?,
            "momentum_stable" => self.momentum_stable = value.as_f64(name)?,
            "nesterov_accelerated_gradient" => {
                self.nesterov_accelerated_gradient = value.as_bool(name)?
            }
            "stopping_rounds" => self.stopping_rounds = value.as_usize(name)?,
            "stopping_metric" => {
                self.stopping_metric = value
                    .as_str(name)?
                    .parse()
                    .map_err(SessionError::Validation)?;
            }
            "stopping_tolerance" => self.stopping_tolerance = value.as_f64(name)?,
            "nfolds" => self.nfolds = value.as_usize(name)?,
            "seed" => self.seed = Some(value.as_u64(name)?),
            "reproducible" => self.reproducible = value.as_bool(name)?,
            "checkpoint" => self.checkpoint = Some(value.as_str(name)?.to_string()),
            _ => return invalid(&format!("unknown deeplearning option '{name}'")),
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), SessionError> {
    Err(SessionError::Validation(msg.to_string()))
}

fn check_range(
    option: &str,
    value: f64,
    low: f64,
    high: f64,
    low_inclusive: bool,
) -> Result<(), SessionError> {
    let above = if low_inclusive { value >= low } else { value > low };
    if above && value.is_finite() && value < high {
        return Ok(());
    }

    let open = if low_inclusive { '[' } else { '(' };
    invalid(&format!("{option} must be in {open}{low}, {high}), got {value}"))
}

fn check_ratio(option: &str, value: f64) -> Result<(), SessionError> {
    check_range(option, value, 0.0, 1.0, true)
}
