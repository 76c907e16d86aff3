//! Integration test: classifiers on a small churn-like table

use kolosal_churn::data::RecordTable;
use kolosal_churn::training::{
    BoostingType, Classifier, DecisionTree, LightGBMClassifier, LightGBMConfig, MaxFeatures,
    ModelSpec, RandomForest, RandomForestParams, TrainedModel,
};
use polars::prelude::*;

fn classification_df() -> DataFrame {
    df!(
        "f1" => &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
                   1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5, 8.5, 9.5, 10.5],
        "f2" => &[10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0,
                   9.5, 8.5, 7.5, 6.5, 5.5, 4.5, 3.5, 2.5, 1.5, 0.5],
        "f3" => &[true, false, true, false, true, false, true, false, true, false,
                   true, false, true, false, true, false, true, false, true, false],
        "Exited" => &[0i64, 0, 0, 0, 0, 1, 1, 1, 1, 1,
                      0, 0, 0, 0, 0, 1, 1, 1, 1, 1]
    )
    .unwrap()
}

fn table() -> RecordTable {
    RecordTable::from_dataframe(&classification_df(), "Exited").unwrap()
}

fn accuracy(model: &dyn Classifier, table: &RecordTable) -> f64 {
    let pred = model.predict(table.features()).unwrap();
    pred.iter().zip(table.labels().iter()).filter(|(p, y)| p == y).count() as f64 / table.n_rows() as f64
}

#[test]
fn test_bool_features_are_cast() {
    let t = table();
    assert_eq!(t.n_features(), 3);
    assert_eq!(t.features()[[0, 2]], 1.0);
    assert_eq!(t.features()[[1, 2]], 0.0);
}

#[test]
fn test_train_decision_tree_classification() {
    let t = table();
    let mut tree = DecisionTree::new().with_random_state(0);
    tree.fit(t.features(), t.labels()).unwrap();
    assert_eq!(accuracy(&tree, &t), 1.0);
    assert!(tree.get_depth() >= 1);
}

#[test]
fn test_train_random_forest_classification() {
    let t = table();
    let mut rf = RandomForest::new(20)
        .with_max_depth(4)
        .with_max_features(MaxFeatures::Fixed(2))
        .with_random_state(1);
    rf.fit(t.features(), t.labels()).unwrap();

    assert!(accuracy(&rf, &t) >= 0.9);
    let importances = rf.feature_importances().unwrap();
    assert!((importances.sum() - 1.0).abs() < 1e-9);
}

#[test]
fn test_train_lightgbm_classification() {
    let t = table();
    for (boosting_type, floor) in [(BoostingType::Gbdt, 0.9), (BoostingType::Goss, 0.75)] {
        let mut model = LightGBMClassifier::new(LightGBMConfig {
            n_estimators: 30,
            min_child_samples: 2,
            boosting_type,
            ..Default::default()
        });
        model.fit(t.features(), t.labels()).unwrap();
        assert!(accuracy(&model, &t) >= floor, "{:?}", boosting_type);
    }
}

#[test]
fn test_fits_are_deterministic() {
    let t = table();
    let spec = ModelSpec::RandomForest(RandomForestParams {
        n_estimators: 15,
        random_state: Some(9),
        ..Default::default()
    });

    let mut a = spec.build().unwrap();
    let mut b = spec.build().unwrap();
    a.fit(t.features(), t.labels()).unwrap();
    b.fit(t.features(), t.labels()).unwrap();
    assert_eq!(
        a.predict_positive_proba(t.features()).unwrap(),
        b.predict_positive_proba(t.features()).unwrap()
    );
}

#[test]
fn test_serialized_model_reloads() {
    let t = table();
    let mut model = TrainedModel::LGBMClassifier(LightGBMClassifier::new(LightGBMConfig {
        n_estimators: 10,
        min_child_samples: 2,
        ..Default::default()
    }));
    model.fit(t.features(), t.labels()).unwrap();

    let back = TrainedModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
    let before = model.predict_positive_proba(t.features()).unwrap();
    let after = back.predict_positive_proba(t.features()).unwrap();
    assert!(before.iter().zip(after.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
}

#[test]
fn test_predict_before_fit_fails() {
    let t = table();
    let model = RandomForest::new(5);
    assert!(model.predict_proba(t.features()).is_err());
    assert!(!model.is_fitted());
}
