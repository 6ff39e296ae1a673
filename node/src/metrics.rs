use comms::specs::metrics::{
    ClassificationMetrics, ConfusionMatrix, MetricsSummary, RegressionMetrics,
};

use crate::{
    error::{NodeErr, Result},
    estimator::{Prediction, Response},
};

const MIN_PROB: f64 = 1e-15;

/// Scores `prediction` against the `actual` response of the same rows.
///
/// # Errors
/// Returns `NodeErr::State` if there is nothing to score or the kinds do not match.
pub fn evaluate(prediction: &Prediction, actual: &Response) -> Result<MetricsSummary> {
    if actual.is_empty() {
        return Err(NodeErr::State("there are no rows with a response to score".into()));
    }

    if prediction.len() != actual.len() {
        return Err(NodeErr::State(format!(
            "{} predictions for {} responses",
            prediction.len(),
            actual.len()
        )));
    }

    match (prediction, actual) {
        (Prediction::Values(predicted), Response::Values(actual)) => Ok(
            MetricsSummary::Regression(regression(actual, predicted)),
        ),
        (
            Prediction::Classes {
                levels,
                labels,
                probs,
            },
            Response::Classes(actual),
        ) => Ok(MetricsSummary::Classification(classification(
            levels, actual, labels, probs,
        ))),
        _ => Err(NodeErr::State(
            "the model and the frame disagree on the problem type".into(),
        )),
    }
}

pub fn regression(actual: &[f64], predicted: &[f64]) -> RegressionMetrics {
    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;

    let (mut sse, mut sae, mut sst) = (0.0, 0.0, 0.0);
    for (a, p) in actual.iter().zip(predicted) {
        let residual = a - p;
        sse += residual * residual;
        sae += residual.abs();
        sst += (a - mean).powi(2);
    }

    let mse = sse / n;
    let r2 = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };

    RegressionMetrics {
        nobs: actual.len(),
        mse,
        rmse: mse.sqrt(),
        mae: sae / n,
        r2,
        mean_residual_deviance: mse,
    }
}

pub fn classification(
    levels: &[String],
    actual: &[usize],
    predicted: &[usize],
    probs: &[Vec<f64>],
) -> ClassificationMetrics {
    let k = levels.len();
    let n = actual.len() as f64;
    let mut counts = vec![vec![0u64; k]; k];
    let (mut sse, mut logloss) = (0.0, 0.0);

    for ((&a, &p), row) in actual.iter().zip(predicted).zip(probs) {
        counts[a][p] += 1;

        let p_actual = row.get(a).copied().unwrap_or_default();
        sse += (1.0 - p_actual).powi(2);
        logloss -= p_actual.max(MIN_PROB).ln();
    }

    let matrix = ConfusionMatrix {
        labels: levels.to_vec(),
        counts,
    };

    let error = 1.0 - matrix.correct() as f64 / n;

    let per_class: Vec<f64> = matrix
        .counts
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let total: u64 = row.iter().sum();
            (total > 0).then(|| 1.0 - row[i] as f64 / total as f64)
        })
        .collect();
    let mean_per_class_error = per_class.iter().sum::<f64>() / per_class.len().max(1) as f64;

    let mse = sse / n;
    ClassificationMetrics {
        nobs: actual.len(),
        mse,
        rmse: mse.sqrt(),
        logloss: logloss / n,
        error,
        mean_per_class_error,
        confusion_matrix: matrix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_regression() {
        let m = regression(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn constant_target_has_zero_r2() {
        let m = regression(&[2.0, 2.0], &[1.0, 3.0]);
        assert_eq!(m.r2, 0.0);
        assert_eq!(m.mae, 1.0);
    }

    #[test]
    fn classification_counts_mistakes() {
        let levels = vec!["a".to_string(), "b".to_string()];
        let probs = vec![vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4], vec![0.3, 0.7]];
        let m = classification(&levels, &[0, 1, 1, 1], &[0, 1, 0, 1], &probs);

        assert_eq!(m.confusion_matrix.counts, vec![vec![1, 0], vec![1, 2]]);
        assert!((m.error - 0.25).abs() < 1e-12);
        assert!((m.mean_per_class_error - (0.0 + 1.0 / 3.0) / 2.0).abs() < 1e-12);
        assert!(m.logloss.is_finite());
    }

    #[test]
    fn zero_probability_is_clamped() {
        let levels = vec!["a".to_string(), "b".to_string()];
        let m = classification(&levels, &[0], &[1], &[vec![0.0, 1.0]]);
        assert!(m.logloss.is_finite());
        assert!(m.logloss > 30.0);
    }

    #[test]
    fn mismatched_kinds_are_rejected() {
        let prediction = Prediction::Values(vec![1.0]);
        let actual = Response::Classes(vec![0]);
        assert!(matches!(evaluate(&prediction, &actual), Err(NodeErr::State(_))));
    }
}
