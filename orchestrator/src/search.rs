//! Hyper-parameter searches: exhaustive grids and seeded random draws.

use std::{cmp::Ordering, collections::BTreeMap};

use comms::specs::metrics::Metric;
use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::{configs::ParamValue, error::SessionError, handles::Model};

/// One assignment of option values.
pub type Combination = BTreeMap<String, ParamValue>;

/// Candidate values per option, searched exhaustively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParams(BTreeMap<String, Vec<ParamValue>>);

impl HyperParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the candidates for `option`, replacing previous ones.
    pub fn with<V: Into<ParamValue>>(
        mut self,
        option: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.0
            .insert(option.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// The number of combinations in the grid.
    pub fn size(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }

        self.0.values().map(Vec::len).product()
    }

    /// Every combination of candidate values.
    ///
    /// Options are iterated in name order, the last one varying fastest.
    ///
    /// # Errors
    /// `SessionError::Validation` if there are no options or an option has no candidates.
    pub fn combinations(&self) -> Result<Vec<Combination>, SessionError> {
        if self.0.is_empty() {
            return Err(SessionError::Validation(
                "a grid needs at least one option".into(),
            ));
        }

        if let Some((name, _)) = self.0.iter().find(|(_, values)| values.is_empty()) {
            return Err(SessionError::Validation(format!(
                "option '{name}' has no candidate values"
            )));
        }

        let mut combinations = vec![Combination::new()];
        for (name, values) in &self.0 {
            combinations = combinations
                .into_iter()
                .flat_map(|partial| {
                    values.iter().map(move |value| {
                        let mut next = partial.clone();
                        next.insert(name.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }

        Ok(combinations)
    }
}

/// How a single option is drawn in a random search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sampler {
    /// One of the values, uniformly.
    Choice { values: Vec<ParamValue> },
    /// A float in `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// A float whose logarithm is uniform in `[ln low, ln high)`.
    LogUniform { low: f64, high: f64 },
    /// An integer in `[low, high]`.
    IntUniform { low: i64, high: i64 },
    Normal { mean: f64, std_dev: f64 },
}

impl Sampler {
    pub fn choice<V: Into<ParamValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::Choice {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn validate(&self, option: &str) -> Result<(), SessionError> {
        let invalid = |msg: String| Err(SessionError::Validation(format!("sampler for '{option}': {msg}")));

        match *self {
            Sampler::Choice { ref values } if values.is_empty() => {
                invalid("no values to choose from".into())
            }
            Sampler::Uniform { low, high } if !(low < high) || !(high - low).is_finite() => {
                invalid(format!("empty range [{low}, {high})"))
            }
            Sampler::LogUniform { low, high } if !(low > 0.0 && low < high && high.is_finite()) => {
                invalid(format!("needs 0 < low < high, got [{low}, {high})"))
            }
            Sampler::IntUniform { low, high } if low > high => {
                invalid(format!("empty range [{low}, {high}]"))
            }
            Sampler::Normal { mean, std_dev } if !mean.is_finite() || !(std_dev >= 0.0) => {
                invalid(format!("invalid normal distribution ({mean}, {std_dev})"))
            }
            _ => Ok(()),
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> Result<ParamValue, SessionError> {
        let value = match self {
            Sampler::Choice { values } => values[rng.random_range(0..values.len())].clone(),
            Sampler::Uniform { low, high } => ParamValue::Float(uniform(*low, *high)?.sample(rng)),
            Sampler::LogUniform { low, high } => {
                let exponent = uniform(low.ln(), high.ln())?.sample(rng);
                ParamValue::Float(exponent.exp())
            }
            Sampler::IntUniform { low, high } => {
                let dist = Uniform::new_inclusive(*low, *high).map_err(distribution_error)?;
                ParamValue::Int(dist.sample(rng))
            }
            Sampler::Normal { mean, std_dev } => {
                let dist = Normal::new(*mean, *std_dev).map_err(distribution_error)?;
                ParamValue::Float(dist.sample(rng))
            }
        };

        Ok(value)
    }
}

fn uniform(low: f64, high: f64) -> Result<Uniform<f64>, SessionError> {
    Uniform::new(low, high).map_err(distribution_error)
}

fn distribution_error<E: std::fmt::Display>(e: E) -> SessionError {
    SessionError::Validation(e.to_string())
}

/// Samplers per option for a random search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace(BTreeMap<String, Sampler>);

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, option: &str, sampler: Sampler) -> Self {
        self.0.insert(option.to_string(), sampler);
        self
    }

    /// Draws `trials` independent combinations, reproducible for a given `seed`.
    ///
    /// # Errors
    /// `SessionError::Validation` if the space is empty or a sampler is malformed.
    pub fn draw(&self, trials: usize, seed: u64) -> Result<Vec<Combination>, SessionError> {
        if self.0.is_empty() {
            return Err(SessionError::Validation(
                "a random search needs at least one option".into(),
            ));
        }

        for (option, sampler) in &self.0 {
            sampler.validate(option)?;
        }

        let mut rng = StdRng::seed_from_u64(seed);
        (0..trials)
            .map(|trial| {
                let combination = self
                    .0
                    .iter()
                    .map(|(option, sampler)| Ok((option.clone(), sampler.sample(&mut rng)?)))
                    .collect::<Result<Combination, SessionError>>()?;

                debug!(trial = trial; "drew {combination:?}");
                Ok(combination)
            })
            .collect()
    }
}

/// A model trained by a search, with the option values it was trained with.
#[derive(Debug, Clone)]
pub struct GridModel {
    pub params: Combination,
    pub model: Model,
}

impl GridModel {
    /// Validation metrics when there are any, otherwise cross validation and then training metrics.
    pub fn score(&self, metric: Metric) -> Option<f64> {
        let meta = self.model.meta();
        meta.validation_metrics
            .as_ref()
            .or(meta.cross_validation_metrics.as_ref())
            .unwrap_or(&meta.training_metrics)
            .get(metric)
    }
}

/// The result of a grid or random search.
#[derive(Debug, Clone)]
pub struct Grid {
    pub id: String,
    pub models: Vec<GridModel>,
}

impl Grid {
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The models ordered by `metric`, models lacking it go last.
    pub fn sorted_by(&self, metric: Metric, decreasing: bool) -> Vec<&GridModel> {
        let mut models: Vec<&GridModel> = self.models.iter().collect();
        models.sort_by(|a, b| match (a.score(metric), b.score(metric)) {
            (Some(a), Some(b)) if decreasing => b.total_cmp(&a),
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        models
    }

    /// The best model for `metric`, respecting whether it is maximised or minimised.
    pub fn best(&self, metric: Metric) -> Option<&GridModel> {
        self.sorted_by(metric, metric.higher_is_better())
            .into_iter()
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_the_cartesian_product() {
        let grid = HyperParams::new()
            .with("hidden", [vec![10i64], vec![20, 20]])
            .with("l1", [0.0, 1e-4, 1e-3])
            .with("activation", ["Tanh", "Rectifier"]);

        let combinations = grid.combinations().unwrap();
        assert_eq!(grid.size(), 12);
        assert_eq!(combinations.len(), 12);

        let first = &combinations[0];
        assert_eq!(first["activation"], ParamValue::Str("Tanh".into()));
        assert_eq!(first["hidden"], ParamValue::IntList(vec![10]));
        assert_eq!(first["l1"], ParamValue::Float(0.0));
        assert_eq!(combinations[1]["l1"], ParamValue::Float(1e-4));
    }

    #[test]
    fn empty_candidates_are_rejected() {
        let grid = HyperParams::new().with("l1", Vec::<f64>::new());
        assert!(grid.combinations().is_err());
        assert!(HyperParams::new().combinations().is_err());
    }

    #[test]
    fn random_draws_respect_bounds_and_seed() {
        let space = SearchSpace::new()
            .with("l1", Sampler::LogUniform { low: 1e-6, high: 1e-3 })
            .with("epochs", Sampler::IntUniform { low: 1, high: 5 })
            .with("activation", Sampler::choice(["Tanh", "Maxout"]));

        let draws = space.draw(20, 9).unwrap();
        assert_eq!(draws.len(), 20);
        assert_eq!(draws, space.draw(20, 9).unwrap());

        for draw in &draws {
            let ParamValue::Float(l1) = draw["l1"] else {
                panic!("expected a float");
            };
            assert!((1e-6..1e-3).contains(&l1));

            let ParamValue::Int(epochs) = draw["epochs"] else {
                panic!("expected an int");
            };
            assert!((1..=5).contains(&epochs));
        }
    }

    #[test]
    fn malformed_samplers_are_rejected() {
        let space = SearchSpace::new().with("rate", Sampler::Uniform { low: 1.0, high: 0.5 });
        assert!(space.draw(1, 0).is_err());
    }

    #[test]
    fn samplers_read_from_json() {
        let space: SearchSpace = serde_json::from_str(
            r#"{"l2": {"type": "uniform", "low": 0.0, "high": 0.01},
                "hidden": {"type": "choice", "values": [[10], [20, 20]]}}"#,
        )
        .unwrap();
        assert_eq!(space.draw(3, 1).unwrap().len(), 3);
    }
}
