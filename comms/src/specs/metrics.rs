use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Rows are actual classes, columns are predicted classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> u64 {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, row)| row.get(i).copied().unwrap_or_default())
            .sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(String::len)
            .chain(self.counts.iter().flatten().map(|c| c.to_string().len()))
            .max()
            .unwrap_or(1);

        write!(f, "{:>width$}", "")?;
        for label in &self.labels {
            write!(f, " {label:>width$}")?;
        }
        writeln!(f)?;

        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{label:>width$}")?;
            for count in row {
                write!(f, " {count:>width$}")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub nobs: usize,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    pub mean_residual_deviance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub nobs: usize,
    pub mse: f64,
    pub rmse: f64,
    pub logloss: f64,
    pub error: f64,
    pub mean_per_class_error: f64,
    pub confusion_matrix: ConfusionMatrix,
}

/// The scores of a model against some frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSummary {
    Regression(RegressionMetrics),
    Classification(ClassificationMetrics),
}

impl MetricsSummary {
    pub fn nobs(&self) -> usize {
        match self {
            MetricsSummary::Regression(m) => m.nobs,
            MetricsSummary::Classification(m) => m.nobs,
        }
    }

    pub fn mse(&self) -> f64 {
        match self {
            MetricsSummary::Regression(m) => m.mse,
            MetricsSummary::Classification(m) => m.mse,
        }
    }

    pub fn confusion_matrix(&self) -> Option<&ConfusionMatrix> {
        match self {
            MetricsSummary::Regression(_) => None,
            MetricsSummary::Classification(m) => Some(&m.confusion_matrix),
        }
    }

    /// Looks up `metric`, `None` when it does not apply to this kind of problem.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match (self, metric) {
            (_, Metric::Mse) => Some(self.mse()),
            (MetricsSummary::Regression(m), Metric::Rmse) => Some(m.rmse),
            (MetricsSummary::Classification(m), Metric::Rmse) => Some(m.rmse),
            (MetricsSummary::Regression(m), Metric::Mae) => Some(m.mae),
            (MetricsSummary::Regression(m), Metric::R2) => Some(m.r2),
            (MetricsSummary::Regression(m), Metric::Deviance) => Some(m.mean_residual_deviance),
            (MetricsSummary::Classification(m), Metric::Logloss) => Some(m.logloss),
            (MetricsSummary::Classification(m), Metric::Error) => Some(m.error),
            (MetricsSummary::Classification(m), Metric::MeanPerClassError) => {
                Some(m.mean_per_class_error)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsSummary::Regression(m) => {
                writeln!(f, "regression metrics ({} rows)", m.nobs)?;
                writeln!(f, "  mse:  {:.6}", m.mse)?;
                writeln!(f, "  rmse: {:.6}", m.rmse)?;
                writeln!(f, "  mae:  {:.6}", m.mae)?;
                writeln!(f, "  r2:   {:.6}", m.r2)
            }
            MetricsSummary::Classification(m) => {
                writeln!(f, "classification metrics ({} rows)", m.nobs)?;
                writeln!(f, "  mse:     {:.6}", m.mse)?;
                writeln!(f, "  logloss: {:.6}", m.logloss)?;
                writeln!(f, "  error:   {:.6}", m.error)?;
                writeln!(f, "  mean per class error: {:.6}", m.mean_per_class_error)?;
                write!(f, "{}", m.confusion_matrix)
            }
        }
    }
}

/// A named scalar metric, used to rank models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Mse,
    Rmse,
    Mae,
    R2,
    Deviance,
    Logloss,
    Error,
    MeanPerClassError,
}

impl Metric {
    /// Whether larger values are better.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::R2)
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let metric = match s.to_ascii_lowercase().as_str() {
            "mse" => Metric::Mse,
            "rmse" => Metric::Rmse,
            "mae" => Metric::Mae,
            "r2" => Metric::R2,
            "deviance" | "mean_residual_deviance" => Metric::Deviance,
            "logloss" => Metric::Logloss,
            "error" | "err" => Metric::Error,
            "mean_per_class_error" => Metric::MeanPerClassError,
            _ => return Err(format!("unknown metric '{s}'")),
        };

        Ok(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification() -> MetricsSummary {
        MetricsSummary::Classification(ClassificationMetrics {
            nobs: 4,
            mse: 0.1,
            rmse: 0.1f64.sqrt(),
            logloss: 0.3,
            error: 0.25,
            mean_per_class_error: 0.25,
            confusion_matrix: ConfusionMatrix {
                labels: vec!["a".into(), "b".into()],
                counts: vec![vec![2, 0], vec![1, 1]],
            },
        })
    }

    #[test]
    fn confusion_matrix_totals() {
        let metrics = classification();
        let cm = metrics.confusion_matrix().unwrap();
        assert_eq!(cm.total(), 4);
        assert_eq!(cm.correct(), 3);
    }

    #[test]
    fn metric_lookup_respects_problem_kind() {
        let metrics = classification();
        assert_eq!(metrics.get(Metric::Logloss), Some(0.3));
        assert_eq!(metrics.get(Metric::R2), None);
    }
}
