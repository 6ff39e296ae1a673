use std::collections::BTreeSet;

use comms::specs::{
    frame::FrameMeta,
    model::{AlgorithmSpec, DeepLearningSpec, ModelMeta, TrainSpec},
};

use super::{DeepLearningConfig, ModelConfig};
use crate::error::SessionError;

/// Turns a model configuration into the training request sent to the node.
#[derive(Debug, Default)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Validates `config` against the frames it will be trained on and builds the request.
    ///
    /// # Arguments
    /// * `config` - The model configuration.
    /// * `training` - The training frame.
    /// * `validation` - The validation frame, if any.
    /// * `checkpoint` - The model named by the configuration's checkpoint, if any.
    ///
    /// # Errors
    /// `SessionError::Validation` if the configuration is malformed, references
    /// unknown columns or does not continue the checkpoint consistently.
    pub fn adapt_train(
        &self,
        config: &ModelConfig,
        training: &FrameMeta,
        validation: Option<&FrameMeta>,
        checkpoint: Option<&ModelMeta>,
    ) -> Result<TrainSpec, SessionError> {
        config.validate()?;

        let ModelConfig::DeepLearning(dl) = config;
        self.validate_columns(dl, training, validation)?;

        match (dl.checkpoint.as_deref(), checkpoint) {
            (Some(_), Some(previous)) => self.validate_checkpoint(dl, previous)?,
            (Some(key), None) => {
                return Err(SessionError::Validation(format!(
                    "checkpoint model '{key}' is unknown"
                )));
            }
            (None, _) => {}
        }

        Ok(TrainSpec {
            model_id: dl.model_id.clone(),
            algorithm: AlgorithmSpec::DeepLearning(self.adapt_deep_learning(dl)),
            training_frame: training.key.clone(),
            validation_frame: validation.map(|v| v.key.clone()),
        })
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    fn validate_columns(
        &self,
        config: &DeepLearningConfig,
        training: &FrameMeta,
        validation: Option<&FrameMeta>,
    ) -> Result<(), SessionError> {
        for name in config.x.iter().chain([&config.y]) {
            let Some(column) = training.column(name) else {
                return Err(SessionError::Validation(format!(
                    "column '{name}' is not in training frame {}",
                    training.key
                )));
            };

            let Some(validation) = validation else {
                continue;
            };

            match validation.column(name) {
                None => {
                    return Err(SessionError::Validation(format!(
                        "column '{name}' is not in validation frame {}",
                        validation.key
                    )));
                }
                Some(other) if other.kind.is_categorical() != column.kind.is_categorical() => {
                    return Err(SessionError::Validation(format!(
                        "column '{name}' has different types in {} and {}",
                        training.key, validation.key
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(response) = training.column(&config.y)
            && response.kind.is_categorical()
            && response.kind.levels().len() < 2
        {
            return Err(SessionError::Validation(format!(
                "categorical response '{}' needs at least two levels, has {}",
                config.y,
                response.kind.levels().len()
            )));
        }

        Ok(())
    }

    fn validate_checkpoint(
        &self,
        config: &DeepLearningConfig,
        previous: &ModelMeta,
    ) -> Result<(), SessionError> {
        let AlgorithmSpec::DeepLearning(prev) = &previous.params;
        let key = &previous.key;

        if prev.hidden != config.hidden {
            return Err(SessionError::Validation(format!(
                "checkpoint {key} has hidden layers {:?}, the configuration has {:?}",
                prev.hidden, config.hidden
            )));
        }

        if prev.activation != config.activation {
            return Err(SessionError::Validation(format!(
                "checkpoint {key} uses {} activation, the configuration uses {}",
                prev.activation, config.activation
            )));
        }

        let before: BTreeSet<&String> = prev.x.iter().collect();
        let after: BTreeSet<&String> = config.x.iter().collect();
        if prev.y != config.y || before != after {
            return Err(SessionError::Validation(format!(
                "checkpoint {key} was trained with different x or y columns"
            )));
        }

        if config.epochs <= previous.epochs_trained {
            return Err(SessionError::Validation(format!(
                "epochs ({}) must exceed the {} epochs checkpoint {key} was trained for",
                config.epochs, previous.epochs_trained
            )));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Adaptation
    // -------------------------------------------------------------------------

    fn adapt_deep_learning(&self, config: &DeepLearningConfig) -> DeepLearningSpec {
        DeepLearningSpec {
            x: config.x.clone(),
            y: config.y.clone(),
            hidden: config.hidden.clone(),
            activation: config.activation,
            epochs: config.epochs,
            l1: config.l1,
            l2: config.l2,
            input_dropout_ratio: config.input_dropout_ratio,
            hidden_dropout_ratios: config.resolved_dropout_ratios(),
            adaptive_rate: config.adaptive_rate,
            rho: config.rho,
            epsilon: config.epsilon,
            rate: config.rate,
            rate_annealing: config.rate_annealing,
            rate_decay: config.rate_decay,
            momentum_start: config.momentum_start,
            momentum_ramp: config.momentum_ramp,
            momentum_stable: config.momentum_stable,
            nesterov_accelerated_gradient: config.nesterov_accelerated_gradient,
            stopping_rounds: config.stopping_rounds,
            stopping_metric: config.stopping_metric,
            stopping_tolerance: config.stopping_tolerance,
            nfolds: config.nfolds,
            seed: config.seed,
            reproducible: config.reproducible,
            checkpoint: config.checkpoint.clone(),
        }
    }
}
