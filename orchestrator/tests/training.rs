mod common;

use std::collections::BTreeSet;

use orchestrator::{
    Column, FrameData, Handle, HyperParams, Metric, MetricsSummary, ProblemKind, Sampler,
    SearchSpace, SessionError,
    configs::{Activation, DeepLearningConfig, ModelConfig},
};
use tempfile::TempDir;

use common::{labels, linear_rows, numbers, session, ten_rows, write_csv};

fn classifier() -> ModelConfig {
    DeepLearningConfig {
        hidden: vec![10, 10],
        epochs: 1.0,
        ..DeepLearningConfig::new(["x", "y"], "label")
    }
    .into()
}

fn regressor() -> ModelConfig {
    DeepLearningConfig {
        hidden: vec![8],
        epochs: 2.0,
        activation: Activation::Tanh,
        ..DeepLearningConfig::new(["x1", "x2"], "target")
    }
    .into()
}

#[test]
fn ten_rows_are_labelled_with_known_levels() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "ten.csv", &ten_rows());

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let model = session.fit(&classifier(), &frame, None).unwrap();

    assert_eq!(model.problem(), ProblemKind::Classification);
    assert_eq!(model.response_levels(), &["a".to_string(), "b".to_string()]);

    let predictions = session.predict(&model, &frame).unwrap();
    assert_eq!(predictions.rows(), 10);
    assert_eq!(
        predictions
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>(),
        vec!["predict", "pa", "pb"]
    );

    let data = session.fetch(&predictions).unwrap();
    let predicted = labels(&data, "predict");
    assert_eq!(predicted.len(), 10);
    assert!(predicted.iter().all(|l| l == "a" || l == "b"));

    let expected: Vec<String> = (0..10)
        .map(|i| if i % 2 == 0 { "a" } else { "b" }.to_string())
        .collect();
    assert_eq!(predicted, expected);

    for (pa, pb) in numbers(&data, "pa").iter().zip(numbers(&data, "pb")) {
        assert!((pa + pb - 1.0).abs() < 1e-9);
    }
}

#[test]
fn metrics_follow_the_problem_kind() {
    let dir = TempDir::new().unwrap();
    let ten = write_csv(dir.path(), "ten.csv", &ten_rows());
    let linear = write_csv(dir.path(), "linear.csv", &linear_rows(40));

    let mut session = session();
    let ten = session.import_dataset(&ten).unwrap();
    let linear = session.import_dataset(&linear).unwrap();

    let classifier = session.fit(&classifier(), &ten, None).unwrap();
    let metrics = session.performance(&classifier, &ten).unwrap();
    let matrix = metrics.confusion_matrix().unwrap();
    assert_eq!(matrix.labels, vec!["a", "b"]);
    assert_eq!(matrix.total(), 10);

    let regressor = session.fit(&regressor(), &linear, None).unwrap();
    assert_eq!(regressor.problem(), ProblemKind::Regression);
    let metrics = session.performance(&regressor, &linear).unwrap();
    assert!(matches!(metrics, MetricsSummary::Regression(_)));
    assert!(metrics.confusion_matrix().is_none());
    assert!(metrics.mse() < 1e-3, "mse {}", metrics.mse());
}

#[test]
fn validation_and_cross_validation_metrics() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(60));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let parts = session.split(&frame, &[0.75], 5).unwrap();

    let ModelConfig::DeepLearning(mut config) = regressor();
    config.nfolds = 3;
    config.seed = Some(17);

    let model = session
        .fit(&config.into(), &parts[0], Some(&parts[1]))
        .unwrap();

    assert_eq!(model.validation_metrics().unwrap().nobs(), parts[1].rows());
    assert_eq!(
        model.cross_validation_metrics().unwrap().nobs(),
        parts[0].rows()
    );
}

#[test]
fn unknown_columns_are_rejected_before_training() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "ten.csv", &ten_rows());

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let config: ModelConfig = DeepLearningConfig::new(["x", "nope"], "label").into();
    let err = session.fit(&config, &frame, None).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");

    let config: ModelConfig = DeepLearningConfig::new(["x", "label"], "label").into();
    let err = session.fit(&config, &frame, None).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");

    assert!(session.list().unwrap().1.is_empty());
}

#[test]
fn checkpoint_with_another_topology_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "ten.csv", &ten_rows());

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let mut base = classifier();
    base.set_model_id(Some("base".into()));
    session.fit(&base, &frame, None).unwrap();

    let ModelConfig::DeepLearning(base) = base;
    let resumed = DeepLearningConfig {
        hidden: vec![20],
        epochs: 5.0,
        model_id: Some("resumed".into()),
        checkpoint: Some("base".into()),
        ..base.clone()
    };

    let err = session.fit(&resumed.into(), &frame, None).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");
    assert_eq!(session.list().unwrap().1, vec!["base"]);

    let unknown = DeepLearningConfig {
        epochs: 5.0,
        checkpoint: Some("missing".into()),
        ..base
    };
    let err = session.fit(&unknown.into(), &frame, None).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");
}

#[test]
fn checkpoint_continues_training() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "ten.csv", &ten_rows());

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let mut base = classifier();
    base.set_model_id(Some("base".into()));
    session.fit(&base, &frame, None).unwrap();

    let ModelConfig::DeepLearning(base) = base;
    let resumed = DeepLearningConfig {
        epochs: 3.0,
        model_id: Some("resumed".into()),
        checkpoint: Some("base".into()),
        ..base
    };

    let model = session.fit(&resumed.into(), &frame, None).unwrap();
    assert_eq!(model.key(), "resumed");
    assert_eq!(model.epochs_trained(), 3.0);
    assert_eq!(model.training_metrics().nobs(), 10);
    assert_eq!(session.list().unwrap().1, vec!["base", "resumed"]);
}

#[test]
fn save_then_load_predicts_identically() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(30));
    let models = dir.path().join("models");

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let model = session.fit(&regressor(), &frame, None).unwrap();
    let before = session.predict(&model, &frame).unwrap();
    let before = numbers(&session.fetch(&before).unwrap(), "predict");

    let saved = session.save(&model, &models).unwrap();
    assert_eq!(saved, models.join(model.key()));
    session.remove(&model).unwrap();
    assert!(matches!(
        session.predict(&model, &frame),
        Err(SessionError::State(_))
    ));

    let loaded = session.load(&saved).unwrap();
    assert_eq!(loaded.key(), model.key());
    assert_eq!(loaded.meta(), model.meta());

    let after = session.predict(&loaded, &frame).unwrap();
    let after = numbers(&session.fetch(&after).unwrap(), "predict");
    assert_eq!(before, after);

    let err = session.load(dir.path().join("nothing")).unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err}");
}

#[test]
fn scoring_checks_the_schema() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(20));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let model = session.fit(&regressor(), &frame, None).unwrap();

    let features_only = FrameData::new(vec![
        Column::numeric("x1", vec![Some(1.0), Some(2.0)]),
        Column::numeric("x2", vec![Some(0.0), Some(3.0)]),
    ]);
    let features_only = session.upload(None, features_only).unwrap();

    assert_eq!(session.predict(&model, &features_only).unwrap().rows(), 2);
    let err = session.performance(&model, &features_only).unwrap_err();
    assert!(matches!(err, SessionError::State(_)), "{err}");

    let mistyped = session.as_factor(&frame, "x2").unwrap();
    let err = session.predict(&model, &mistyped).unwrap_err();
    assert!(matches!(err, SessionError::State(_)), "{err}");
}

#[test]
fn grid_trains_every_combination() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(40));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();
    let parts = session.split(&frame, &[0.8], 21).unwrap();

    let hyper_params = HyperParams::new()
        .with("hidden", [vec![4i64], vec![8, 8]])
        .with("l2", [0.0, 0.01, 0.1])
        .with("epochs", [1.0, 2.0]);

    let mut base = regressor();
    base.set_model_id(Some("dl".into()));
    let grid = session
        .grid_search(&hyper_params, &base, &parts[0], Some(&parts[1]))
        .unwrap();

    assert_eq!(grid.len(), 12);
    let keys: BTreeSet<&str> = grid.models.iter().map(|m| m.model.key()).collect();
    assert_eq!(keys.len(), 12);
    assert!(keys.contains("dl_0") && keys.contains("dl_11"));

    let ranked = grid.sorted_by(Metric::Mse, false);
    let scores: Vec<f64> = ranked.iter().map(|m| m.score(Metric::Mse).unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        grid.best(Metric::Mse).unwrap().model.key(),
        ranked[0].model.key()
    );
}

#[test]
fn one_invalid_combination_fails_the_whole_grid() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(20));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let hyper_params = HyperParams::new().with("l2", [0.0, -1.0]);
    let err = session
        .grid_search(&hyper_params, &regressor(), &frame, None)
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");

    let hyper_params = HyperParams::new().with("no_such_option", [1i64]);
    let err = session
        .grid_search(&hyper_params, &regressor(), &frame, None)
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err}");

    assert!(session.list().unwrap().1.is_empty());
}

#[test]
fn random_search_draws_the_requested_trials() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "linear.csv", &linear_rows(40));

    let mut session = session();
    let frame = session.import_dataset(&path).unwrap();

    let space = SearchSpace::new()
        .with("l2", Sampler::Uniform { low: 0.0, high: 0.1 })
        .with("hidden", Sampler::choice([vec![4i64], vec![16]]));

    let first = session
        .random_search(&space, &regressor(), 5, 99, &frame, None)
        .unwrap();
    let second = session
        .random_search(&space, &regressor(), 5, 99, &frame, None)
        .unwrap();

    assert_eq!(first.len(), 5);
    assert_ne!(first.id, second.id);
    let params = |grid: &orchestrator::Grid| {
        grid.models
            .iter()
            .map(|m| m.params.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(params(&first), params(&second));
    assert_eq!(session.models().len(), 10);
}
