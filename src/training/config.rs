//! Training job configuration

use crate::error::{KolosalError, Result};
use super::decision_tree::Criterion;
use super::lightgbm::{LightGBMClassifier, LightGBMConfig};
use super::models::TrainedModel;
use super::random_forest::{MaxFeatures, RandomForest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub criterion: Criterion,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: Criterion::Gini,
            bootstrap: true,
            random_state: None,
        }
    }
}

/// Which estimator to fit and with what hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", content = "params")]
pub enum ModelSpec {
    RandomForest(RandomForestParams),
    LightGBM(LightGBMConfig),
}

fn opt_to_string<T: ToString>(v: Option<T>, none: &str) -> String {
    v.map_or_else(|| none.to_string(), |v| v.to_string())
}

impl ModelSpec {
    /// Validate hyperparameters and build an unfitted model
    pub fn build(&self) -> Result<TrainedModel> {
        match self {
            ModelSpec::RandomForest(p) => {
                if p.min_samples_split < 2 {
                    return Err(KolosalError::InvalidParameter {
                        name: "min_samples_split".to_string(),
                        value: p.min_samples_split.to_string(),
                        reason: "must be at least 2".to_string(),
                    });
                }
                let mut rf = RandomForest::new(p.n_estimators)
                    .with_max_features(p.max_features)
                    .with_min_samples_split(p.min_samples_split)
                    .with_min_samples_leaf(p.min_samples_leaf)
                    .with_criterion(p.criterion)
                    .with_bootstrap(p.bootstrap);
                if let Some(d) = p.max_depth {
                    rf = rf.with_max_depth(d);
                }
                if let Some(seed) = p.random_state {
                    rf = rf.with_random_state(seed);
                }
                Ok(TrainedModel::RandomForestClassifier(rf))
            }
            ModelSpec::LightGBM(config) => {
                config.validate()?;
                Ok(TrainedModel::LGBMClassifier(LightGBMClassifier::new(config.clone())))
            }
        }
    }

    /// Estimator class name
    pub fn estimator_name(&self) -> &'static str {
        match self {
            ModelSpec::RandomForest(_) => "RandomForestClassifier",
            ModelSpec::LightGBM(_) => "LGBMClassifier",
        }
    }

    /// Every hyperparameter as a string, keyed the way the estimator names it
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            params.insert(k.to_string(), v);
        };

        match self {
            ModelSpec::RandomForest(p) => {
                put("n_estimators", p.n_estimators.to_string());
                put("max_depth", opt_to_string(p.max_depth, "None"));
                put("max_features", p.max_features.to_string());
                put("min_samples_split", p.min_samples_split.to_string());
                put("min_samples_leaf", p.min_samples_leaf.to_string());
                put("criterion", p.criterion.to_string());
                put("bootstrap", p.bootstrap.to_string());
                put("random_state", opt_to_string(p.random_state, "None"));
            }
            ModelSpec::LightGBM(c) => {
                put("objective", "binary".to_string());
                put("eval_metric", "logloss".to_string());
                put("boosting_type", format!("{:?}", c.boosting_type).to_lowercase());
                put("n_estimators", c.n_estimators.to_string());
                put("learning_rate", c.learning_rate.to_string());
                put("num_leaves", c.num_leaves.to_string());
                put("max_depth", opt_to_string(c.max_depth, "-1"));
                put("min_child_samples", c.min_child_samples.to_string());
                put("min_child_weight", c.min_child_weight.to_string());
                put("max_delta_step", c.max_delta_step.to_string());
                put("reg_alpha", c.reg_alpha.to_string());
                put("reg_lambda", c.reg_lambda.to_string());
                put("subsample", c.subsample.to_string());
                put("colsample_bytree", c.colsample_bytree.to_string());
                put("random_state", opt_to_string(c.random_state, "None"));
            }
        }
        params.insert("estimator".to_string(), self.estimator_name().to_string());
        params
    }
}

/// One tracked training invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Run name in the experiment
    pub run_name: String,
    /// Register the logged model under this name
    pub registered_model_name: Option<String>,
    /// Heading used in reports and confusion-matrix plots
    pub title: String,
    pub spec: ModelSpec,
}

impl TrainingJob {
    /// A job whose model is registered under its run name
    pub fn new(run_name: impl Into<String>, title: impl Into<String>, spec: ModelSpec) -> Self {
        let run_name = run_name.into();
        Self {
            registered_model_name: Some(run_name.clone()),
            run_name,
            title: title.into(),
            spec,
        }
    }

    /// Do not register the logged model
    pub fn unregistered(mut self) -> Self {
        self.registered_model_name = None;
        self
    }
}

/// The three churn classifiers: two forests and one boosted model
pub fn default_jobs() -> Vec<TrainingJob> {
    let forest = |max_depth: usize, max_features: usize| {
        ModelSpec::RandomForest(RandomForestParams {
            max_depth: Some(max_depth),
            max_features: MaxFeatures::Fixed(max_features),
            min_samples_split: 3,
            random_state: Some(1),
            ..Default::default()
        })
    };

    vec![
        TrainingJob::new("rfc1_sm", "Random Forest with max depth of 4", forest(4, 4)),
        TrainingJob::new("rfc2_sm", "Random Forest with max depth of 8", forest(8, 6)),
        TrainingJob::new(
            "lgbm_sm",
            "LightGBM",
            ModelSpec::LightGBM(LightGBMConfig {
                learning_rate: 0.07,
                max_delta_step: 2.0,
                n_estimators: 100,
                max_depth: Some(10),
                random_state: Some(42),
                ..Default::default()
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_jobs() {
        let jobs = default_jobs();
        let names: Vec<_> = jobs.iter().map(|j| j.run_name.as_str()).collect();
        assert_eq!(names, ["rfc1_sm", "rfc2_sm", "lgbm_sm"]);
        assert!(jobs.iter().all(|j| j.registered_model_name.as_deref() == Some(j.run_name.as_str())));

        let params = jobs[0].spec.params();
        assert_eq!(params["max_depth"], "4");
        assert_eq!(params["max_features"], "4");
        assert_eq!(params["min_samples_split"], "3");
        assert_eq!(params["random_state"], "1");
        assert_eq!(params["estimator"], "RandomForestClassifier");

        let params = jobs[2].spec.params();
        assert_eq!(params["learning_rate"], "0.07");
        assert_eq!(params["max_delta_step"], "2");
        assert_eq!(params["objective"], "binary");
        assert_eq!(params["eval_metric"], "logloss");
        assert!(!jobs[0].spec.params().contains_key("eval_metric"));
    }

    #[test]
    fn test_spec_json_shape() {
        let job = &default_jobs()[1];
        let json = serde_json::to_value(&job.spec).unwrap();
        assert_eq!(json["model"], "RandomForest");
        assert_eq!(json["params"]["max_depth"], 8);

        let back: ModelSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.params(), job.spec.params());
    }

    #[test]
    fn test_build_rejects_bad_params() {
        let spec = ModelSpec::RandomForest(RandomForestParams { min_samples_split: 1, ..Default::default() });
        assert!(spec.build().is_err());

        let spec = ModelSpec::LightGBM(LightGBMConfig { num_leaves: 1, ..Default::default() });
        assert!(spec.build().is_err());
    }
}
