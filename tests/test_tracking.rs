//! Integration test: tracked runs, artifacts and the model registry

use std::collections::BTreeMap;

use kolosal_churn::data::RecordTable;
use kolosal_churn::error::KolosalError;
use kolosal_churn::evaluation::Evaluator;
use kolosal_churn::tracking::{
    ActiveRun, LocalTracker, ModelSignature, ModelUri, RunStatus, TrackingClient, VersionSelector,
};
use kolosal_churn::training::{default_jobs, Classifier, Trainer};
use ndarray::{Array1, Array2};
use tempfile::TempDir;

fn table(n: usize, offset: usize) -> RecordTable {
    let names: Vec<String> = (0..6).map(|i| format!("f{}", i)).collect();
    let x = Array2::from_shape_fn((n, 6), |(i, j)| (((i + offset) * (j + 3)) % 23) as f64 + j as f64 * 0.5);
    let y = Array1::from_shape_fn(n, |i| ((((i + offset) * 3) % 23) > 12) as i64);
    RecordTable::new(names, "Exited", x, y).unwrap()
}

#[test]
fn test_default_jobs_are_tracked_and_registered() {
    let dir = TempDir::new().unwrap();
    let tracker = LocalTracker::open(dir.path(), "bank-churn-experiment").unwrap();
    let trainer = Trainer::new(&tracker, Evaluator::default());

    let train = table(300, 0);
    let validation = table(100, 7);
    let outcomes = trainer.train_all(&default_jobs(), &train, &validation).unwrap();
    assert_eq!(outcomes.len(), 3);

    for outcome in &outcomes {
        let run = tracker.get_run(outcome.run_id()).unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(run.run_name, outcome.job.run_name);
        assert_eq!(run.metrics["val_accuracy"], outcome.evaluation.scores.accuracy);

        let reloaded = tracker.load_model(&outcome.model_uri).unwrap();
        let live = outcome.model.predict_positive_proba(validation.features()).unwrap();
        let again = reloaded.predict_positive_proba(validation.features()).unwrap();
        assert!(live.iter().zip(again.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    let rf = &outcomes[0];
    let run = tracker.get_run(rf.run_id()).unwrap();
    assert_eq!(run.params["max_depth"], "4");
    assert_eq!(run.params["max_features"], "4");
    assert_eq!(run.params["min_samples_split"], "3");

    let lgbm = &outcomes[2];
    let run = tracker.get_run(lgbm.run_id()).unwrap();
    assert_eq!(run.params["learning_rate"], "0.07");
    assert_eq!(run.params["max_delta_step"], "2");
    assert_eq!(run.params["n_estimators"], "100");

    let registered: Vec<_> = tracker.registered_models().unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(registered.len(), 3);
    for name in ["rfc1_sm", "rfc2_sm", "lgbm_sm"] {
        assert!(registered.iter().any(|n| n == name));
    }
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let run_id = {
        let tracker = LocalTracker::open(dir.path(), "exp").unwrap();
        let run = ActiveRun::start(&tracker, "manual").unwrap();
        run.log_params(&BTreeMap::from([("alpha".to_string(), "1".to_string())])).unwrap();
        run.finish().unwrap().run_id
    };

    let tracker = LocalTracker::open(dir.path(), "exp").unwrap();
    let run = tracker.get_run(&run_id).unwrap();
    assert_eq!(run.params["alpha"], "1");
    assert_eq!(run.status, RunStatus::Finished);
    assert!(run.duration_secs().unwrap() >= 0.0);

    assert!(matches!(
        tracker.set_tag(&run_id, "late", "x"),
        Err(KolosalError::RunNotActive(_))
    ));
}

#[test]
fn test_signature_and_metadata_written() {
    let dir = TempDir::new().unwrap();
    let tracker = LocalTracker::open(dir.path(), "exp").unwrap();
    let train = table(120, 0);

    let mut model = default_jobs()[0].spec.build().unwrap();
    model.fit(train.features(), train.labels()).unwrap();

    let run = tracker.start_run("rfc1_sm").unwrap();
    let signature = ModelSignature::infer(train.feature_names(), "Exited");
    tracker.log_model(&run.run_id, "model", &model, Some(signature), None).unwrap();
    let ended = tracker.end_run(&run.run_id, RunStatus::Finished).unwrap();

    let meta_path = dir
        .path()
        .join(&ended.experiment_id)
        .join(&ended.run_id)
        .join("artifacts/model/MLmodel.json");
    let meta: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();

    assert_eq!(meta["flavor"], "random_forest");
    assert_eq!(meta["estimator"], "RandomForestClassifier");
    assert_eq!(meta["signature"]["inputs"].as_array().unwrap().len(), 6);
    assert_eq!(meta["signature"]["inputs"][0]["type"], "double");
    assert_eq!(meta["signature"]["outputs"][0]["type"], "long");
}

#[test]
fn test_unknown_uris() {
    let dir = TempDir::new().unwrap();
    let tracker = LocalTracker::open(dir.path(), "exp").unwrap();

    assert!(tracker.load_model(&ModelUri::run("missing", "model")).is_err());
    assert!(tracker
        .load_model(&ModelUri::registered("nope", VersionSelector::Latest))
        .is_err());
    assert!(matches!(
        "runs:/x".parse::<ModelUri>(),
        Err(KolosalError::InvalidModelUri(_))
    ));
}
