use std::collections::BTreeSet;

use comms::specs::{
    frame::{Column, ColumnData, ColumnMeta, FrameData},
    metrics::MetricsSummary,
    model::{AlgorithmSpec, DeepLearningSpec, ModelMeta, ProblemKind, TrainSpec},
};
use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{NodeErr, Result},
    estimator::{self, Encoding, Estimator, Prediction, Response},
    metrics,
};

/// A model resident on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub meta: ModelMeta,
    pub estimator: Estimator,
}

/// Fits a model as requested by `spec`.
///
/// # Arguments
/// * `key` - The key the model will be stored under.
/// * `spec` - The training request.
/// * `training` - The training frame.
/// * `validation` - An optional frame to compute validation metrics on.
/// * `checkpoint` - The model to continue training from, if the request names one.
///
/// # Returns
/// The trained model or an error if the request does not fit the data.
pub fn train(
    key: String,
    spec: &TrainSpec,
    training: &FrameData,
    validation: Option<&FrameData>,
    checkpoint: Option<&TrainedModel>,
) -> Result<TrainedModel> {
    let AlgorithmSpec::DeepLearning(params) = &spec.algorithm;
    check_params(params, training)?;

    if let Some(previous) = checkpoint {
        check_checkpoint(params, previous, training)?;
    }

    info!(
        rows = training.nrows(),
        features = params.x.len(),
        nfolds = params.nfolds;
        "training {key} on {}", spec.training_frame
    );

    let rows: Vec<usize> = (0..training.nrows()).collect();
    let warm = checkpoint.map(|c| &c.estimator);
    let estimator = Estimator::fit(training, &rows, &params.x, &params.y, params.l2, warm)?;

    let training_metrics = score(&estimator, training, &params.y)?;
    let validation_metrics = validation
        .map(|frame| {
            let response = response_of(&estimator, &params.y);
            check_columns(&features_of(&estimator), &response, frame, true).map_err(|e| {
                NodeErr::Invalid(format!("validation frame does not match the training frame: {e}"))
            })?;
            score(&estimator, frame, &params.y)
        })
        .transpose()?;

    let cross_validation_metrics = match params.nfolds {
        0 => None,
        nfolds => Some(cross_validate(training, params, nfolds)?),
    };

    let problem = match estimator.response_encoding() {
        Encoding::Numeric => ProblemKind::Regression,
        Encoding::Categorical { .. } => ProblemKind::Classification,
    };

    let meta = ModelMeta {
        key,
        algorithm: spec.algorithm.name().to_string(),
        problem,
        params: spec.algorithm.clone(),
        features: features_of(&estimator),
        response: response_of(&estimator, &params.y),
        training_frame: spec.training_frame.clone(),
        validation_frame: spec.validation_frame.clone(),
        epochs_trained: params.epochs,
        training_metrics,
        validation_metrics,
        cross_validation_metrics,
    };

    Ok(TrainedModel { meta, estimator })
}

fn check_params(params: &DeepLearningSpec, training: &FrameData) -> Result<()> {
    if params.x.is_empty() {
        return Err(NodeErr::Invalid("no feature columns given".into()));
    }

    if params.x.contains(&params.y) {
        return Err(NodeErr::Invalid(format!(
            "response '{}' is also a feature",
            params.y
        )));
    }

    if let Some(name) = params
        .x
        .iter()
        .chain([&params.y])
        .find(|name| training.column(name).is_none())
    {
        return Err(NodeErr::Invalid(format!(
            "training frame has no column '{name}'"
        )));
    }

    if params.hidden.is_empty() || params.hidden.contains(&0) {
        return Err(NodeErr::Invalid(
            "hidden layers must be non empty and have positive sizes".into(),
        ));
    }

    if !(params.epochs > 0.0) || !(params.l2 >= 0.0) || !(params.l1 >= 0.0) {
        return Err(NodeErr::Invalid(
            "epochs must be positive and regularisation non negative".into(),
        ));
    }

    if params.nfolds == 1 || params.nfolds > training.nrows() {
        return Err(NodeErr::Invalid(format!(
            "nfolds must be 0 or between 2 and {}, got {}",
            training.nrows(),
            params.nfolds
        )));
    }

    Ok(())
}

/// Continuation keeps the network shape and the columns with their types, and must add epochs.
fn check_checkpoint(
    params: &DeepLearningSpec,
    previous: &TrainedModel,
    training: &FrameData,
) -> Result<()> {
    let AlgorithmSpec::DeepLearning(prev) = &previous.meta.params;
    let key = &previous.meta.key;

    if prev.hidden != params.hidden {
        return Err(NodeErr::Invalid(format!(
            "checkpoint {key} has hidden layers {:?}, requested {:?}",
            prev.hidden, params.hidden
        )));
    }

    if prev.activation != params.activation {
        return Err(NodeErr::Invalid(format!(
            "checkpoint {key} uses {} activation, requested {}",
            prev.activation, params.activation
        )));
    }

    let before: BTreeSet<&String> = prev.x.iter().collect();
    let after: BTreeSet<&String> = params.x.iter().collect();
    if prev.y != params.y || before != after {
        return Err(NodeErr::Invalid(format!(
            "checkpoint {key} was trained on different columns"
        )));
    }

    let kind = |categorical: bool| if categorical { "categorical" } else { "numeric" };
    for column in previous.meta.features.iter().chain([&previous.meta.response]) {
        if let Some(now) = training.column(&column.name)
            && now.data.kind().is_categorical() != column.kind.is_categorical()
        {
            return Err(NodeErr::Invalid(format!(
                "column '{}' was {} for checkpoint {key}, the training frame has it {}",
                column.name,
                kind(column.kind.is_categorical()),
                kind(now.data.kind().is_categorical())
            )));
        }
    }

    if params.epochs <= previous.meta.epochs_trained {
        return Err(NodeErr::Invalid(format!(
            "epochs must exceed the {} already trained by {key}",
            previous.meta.epochs_trained
        )));
    }

    Ok(())
}

fn features_of(estimator: &Estimator) -> Vec<ColumnMeta> {
    estimator
        .encoders
        .iter()
        .map(|e| ColumnMeta {
            name: e.name.clone(),
            kind: e.encoding.kind(),
        })
        .collect()
}

fn response_of(estimator: &Estimator, y: &str) -> ColumnMeta {
    ColumnMeta {
        name: y.to_string(),
        kind: estimator.response_encoding().kind(),
    }
}

/// Checks that `frame` has the columns a model needs, with matching types.
///
/// # Errors
/// `NodeErr::State` naming the first offending column.
pub fn check_columns(
    features: &[ColumnMeta],
    response: &ColumnMeta,
    frame: &FrameData,
    with_response: bool,
) -> Result<()> {
    let needed = features
        .iter()
        .chain(with_response.then_some(response));

    for expected in needed {
        let Some(column) = frame.column(&expected.name) else {
            return Err(NodeErr::State(format!(
                "frame is missing column '{}'",
                expected.name
            )));
        };

        if column.data.kind().is_categorical() != expected.kind.is_categorical() {
            return Err(NodeErr::State(format!(
                "column '{}' has a different type than the one the model was trained on",
                expected.name
            )));
        }
    }

    Ok(())
}

fn score_rows(
    estimator: &Estimator,
    frame: &FrameData,
    y: &str,
    rows: &[usize],
) -> Result<(Prediction, Response)> {
    let (kept, actual) = estimator::response(frame, y, &estimator.response_encoding(), rows)?;
    let prediction = estimator.predict(frame, &kept)?;
    Ok((prediction, actual))
}

fn score(estimator: &Estimator, frame: &FrameData, y: &str) -> Result<MetricsSummary> {
    let rows: Vec<usize> = (0..frame.nrows()).collect();
    let (prediction, actual) = score_rows(estimator, frame, y, &rows)?;
    metrics::evaluate(&prediction, &actual)
}

/// Scores `model` against `frame`, which must carry the response.
pub fn performance(model: &TrainedModel, frame: &FrameData) -> Result<MetricsSummary> {
    check_columns(&model.meta.features, &model.meta.response, frame, true)?;
    score(&model.estimator, frame, &model.meta.response.name)
}

/// Assigns every row to one of `nfolds` folds, balanced and shuffled by `seed`.
pub fn assign_folds(n: usize, nfolds: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut folds = vec![0; n];
    for (position, &row) in order.iter().enumerate() {
        folds[row] = position % nfolds;
    }

    folds
}

fn cross_validate(
    frame: &FrameData,
    params: &DeepLearningSpec,
    nfolds: usize,
) -> Result<MetricsSummary> {
    let seed = params.seed.unwrap_or_else(rand::random);
    let folds = assign_folds(frame.nrows(), nfolds, seed);

    let outcomes = (0..nfolds)
        .into_par_iter()
        .map(|fold| {
            let (held, kept): (Vec<usize>, Vec<usize>) =
                (0..frame.nrows()).partition(|&row| folds[row] == fold);

            let estimator = Estimator::fit(frame, &kept, &params.x, &params.y, params.l2, None)?;
            debug!(fold = fold, held = held.len(); "scoring fold");
            score_rows(&estimator, frame, &params.y, &held)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut outcomes = outcomes.into_iter();
    let Some((mut prediction, mut actual)) = outcomes.next() else {
        return Err(NodeErr::State("no folds to cross validate".into()));
    };

    for (more_prediction, more_actual) in outcomes {
        prediction.append(more_prediction)?;
        actual.append(more_actual)?;
    }

    metrics::evaluate(&prediction, &actual)
}

/// Predicts every row of `frame`.
///
/// # Returns
/// A frame with a `predict` column and, for classification, one `p<level>`
/// probability column per response level.
pub fn predict(model: &TrainedModel, frame: &FrameData) -> Result<FrameData> {
    check_columns(&model.meta.features, &model.meta.response, frame, false)?;

    let rows: Vec<usize> = (0..frame.nrows()).collect();
    let columns = match model.estimator.predict(frame, &rows)? {
        Prediction::Values(values) => {
            vec![Column::numeric("predict", values.into_iter().map(Some).collect())]
        }
        Prediction::Classes {
            levels,
            labels,
            probs,
        } => {
            let mut columns = Vec::with_capacity(levels.len() + 1);
            columns.push(Column {
                name: "predict".into(),
                data: ColumnData::Categorical {
                    levels: levels.clone(),
                    codes: labels.iter().map(|&l| Some(l as u32)).collect(),
                },
            });

            for (i, level) in levels.iter().enumerate() {
                let values = probs.iter().map(|p| Some(p[i])).collect();
                columns.push(Column::numeric(format!("p{level}"), values));
            }

            columns
        }
    };

    Ok(FrameData::new(columns))
}

#[cfg(test)]
mod tests {
    use comms::specs::model::{Activation, StoppingMetric};

    use super::*;

    fn params(x: &[&str], y: &str) -> DeepLearningSpec {
        DeepLearningSpec {
            x: x.iter().map(|s| s.to_string()).collect(),
            y: y.into(),
            hidden: vec![10, 10],
            activation: Activation::Tanh,
            epochs: 1.0,
            l1: 0.0,
            l2: 0.0,
            input_dropout_ratio: 0.0,
            hidden_dropout_ratios: vec![],
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
            seed: Some(1),
            reproducible: true,
            checkpoint: None,
        }
    }

    fn request(params: DeepLearningSpec) -> TrainSpec {
        TrainSpec {
            model_id: None,
            algorithm: AlgorithmSpec::DeepLearning(params),
            training_frame: "train".into(),
            validation_frame: None,
        }
    }

    fn ten_rows() -> FrameData {
        let labels = ["a", "a", "b", "b", "a", "b", "a", "b", "a", "b"];
        FrameData::new(vec![
            Column::numeric("x", (0..10).map(|i| Some(i as f64)).collect()),
            Column::numeric("y", (0..10).map(|i| Some((i * i) as f64)).collect()),
            Column::categorical(
                "label",
                &labels.iter().map(|l| Some(*l)).collect::<Vec<_>>(),
            ),
        ])
    }

    #[test]
    fn categorical_target_is_classification() {
        let frame = ten_rows();
        let model = train("m".into(), &request(params(&["x", "y"], "label")), &frame, None, None)
            .unwrap();

        assert_eq!(model.meta.problem, ProblemKind::Classification);
        assert!(model.meta.training_metrics.confusion_matrix().is_some());

        let out = predict(&model, &frame).unwrap();
        assert_eq!(out.nrows(), 10);
        assert_eq!(
            out.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["predict", "pa", "pb"]
        );
    }

    #[test]
    fn numeric_target_is_regression() {
        let frame = ten_rows();
        let model =
            train("m".into(), &request(params(&["x"], "y")), &frame, None, None).unwrap();
        assert_eq!(model.meta.problem, ProblemKind::Regression);
        assert!(model.meta.training_metrics.confusion_matrix().is_none());
    }

    #[test]
    fn cross_validation_reports_every_row() {
        let frame = ten_rows();
        let mut p = params(&["x"], "label");
        p.nfolds = 3;
        let model = train("m".into(), &request(p), &frame, None, None).unwrap();
        assert_eq!(model.meta.cross_validation_metrics.unwrap().nobs(), 10);
    }

    #[test]
    fn checkpoint_with_other_topology_is_invalid() {
        let frame = ten_rows();
        let base = train("m".into(), &request(params(&["x"], "label")), &frame, None, None)
            .unwrap();

        let mut p = params(&["x"], "label");
        p.hidden = vec![5];
        p.epochs = 2.0;
        let err = train("m2".into(), &request(p), &frame, None, Some(&base)).unwrap_err();
        assert!(matches!(err, NodeErr::Invalid(_)));
    }

    #[test]
    fn checkpoint_needs_more_epochs() {
        let frame = ten_rows();
        let base = train("m".into(), &request(params(&["x"], "label")), &frame, None, None)
            .unwrap();

        let err = train("m2".into(), &request(params(&["x"], "label")), &frame, None, Some(&base))
            .unwrap_err();
        assert!(matches!(err, NodeErr::Invalid(_)));
    }

    #[test]
    fn checkpoint_keeps_the_problem_kind() {
        let frame = ten_rows();
        let base = train("m".into(), &request(params(&["x"], "label")), &frame, None, None)
            .unwrap();

        let numeric = FrameData::new(vec![
            Column::numeric("x", (0..10).map(|i| Some(i as f64)).collect()),
            Column::numeric("label", (0..10).map(|i| Some((i % 2) as f64)).collect()),
        ]);

        let mut p = params(&["x"], "label");
        p.epochs = 2.0;
        let err = train("m2".into(), &request(p), &numeric, None, Some(&base)).unwrap_err();
        assert!(matches!(err, NodeErr::Invalid(ref msg) if msg.contains("'label'")), "{err}");
    }

    #[test]
    fn performance_needs_the_response() {
        let frame = ten_rows();
        let model = train("m".into(), &request(params(&["x"], "label")), &frame, None, None)
            .unwrap();

        let without = FrameData::new(vec![frame.columns[0].clone()]);
        assert!(matches!(performance(&model, &without), Err(NodeErr::State(_))));
        assert!(predict(&model, &without).is_ok());
    }

    #[test]
    fn folds_are_balanced() {
        let folds = assign_folds(10, 3, 5);
        let mut sizes = [0; 3];
        for f in folds {
            sizes[f] += 1;
        }
        assert_eq!(sizes, [4, 3, 3]);
    }
}
