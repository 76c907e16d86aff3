//! Model evaluation on held-out data

use crate::data::RecordTable;
use crate::error::{KolosalError, Result};
use crate::training::Classifier;
use super::metrics::{log_loss, roc_auc_score, ClassificationMetrics, ConfusionMatrix};
use super::report::ClassificationReport;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Partition whose labels and scores feed the logged `roc_auc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RocAucSplit {
    /// Balanced training set
    #[default]
    Train,
    /// Validation partition
    Validation,
}

impl fmt::Display for RocAucSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RocAucSplit::Train => write!(f, "train"),
            RocAucSplit::Validation => write!(f, "validation"),
        }
    }
}

impl FromStr for RocAucSplit {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "train" | "training" => Ok(RocAucSplit::Train),
            "validation" | "val" => Ok(RocAucSplit::Validation),
            other => Err(KolosalError::ConfigError(format!(
                "roc_auc_split must be 'train' or 'validation', got '{}'",
                other
            ))),
        }
    }
}

/// Metrics on the data the model was fitted on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub scores: ClassificationMetrics,
    pub log_loss: f64,
    pub roc_auc: f64,
}

impl TrainingMetrics {
    pub fn metric_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("training_accuracy_score".to_string(), self.scores.accuracy),
            ("training_precision_score".to_string(), self.scores.precision),
            ("training_recall_score".to_string(), self.scores.recall),
            ("training_f1_score".to_string(), self.scores.f1),
            ("training_log_loss".to_string(), self.log_loss),
            ("training_roc_auc".to_string(), self.roc_auc),
        ])
    }
}

/// Everything computed for one model on the validation partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub scores: ClassificationMetrics,
    pub roc_auc: f64,
    pub roc_auc_split: RocAucSplit,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    #[serde(skip)]
    pub predictions: Array1<i64>,
    #[serde(skip)]
    pub probabilities: Array1<f64>,
}

impl EvaluationReport {
    /// Metrics logged to the run
    pub fn metric_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("val_accuracy".to_string(), self.scores.accuracy),
            ("val_precision".to_string(), self.scores.precision),
            ("val_recall".to_string(), self.scores.recall),
            ("val_f1".to_string(), self.scores.f1),
            ("roc_auc".to_string(), self.roc_auc),
        ])
    }
}

/// Computes metrics, report and confusion matrix for fitted classifiers
#[derive(Debug, Clone)]
pub struct Evaluator {
    roc_auc_split: RocAucSplit,
    target_names: Vec<String>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(RocAucSplit::default())
    }
}

impl Evaluator {
    pub fn new(roc_auc_split: RocAucSplit) -> Self {
        Self {
            roc_auc_split,
            target_names: vec!["Non Churn".to_string(), "Churn".to_string()],
        }
    }

    /// Names for labels 0 and 1 in the classification report
    pub fn with_target_names(mut self, names: Vec<String>) -> Self {
        self.target_names = names;
        self
    }

    pub fn roc_auc_split(&self) -> RocAucSplit {
        self.roc_auc_split
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    /// Score `model` on the data it was fitted on
    pub fn training_metrics(&self, model: &dyn Classifier, train: &RecordTable) -> Result<TrainingMetrics> {
        let proba = model.predict_positive_proba(train.features())?;
        let predicted = model.predict(train.features())?;
        Ok(TrainingMetrics {
            scores: ClassificationMetrics::compute(train.labels(), &predicted)?,
            log_loss: log_loss(train.labels(), &proba)?,
            roc_auc: roc_auc_score(train.labels(), &proba)?,
        })
    }

    /// Evaluate on `validation`. `train` is only read when ROC AUC is taken
    /// from the training split.
    pub fn evaluate(
        &self,
        model: &dyn Classifier,
        validation: &RecordTable,
        train: &RecordTable,
    ) -> Result<EvaluationReport> {
        let probabilities = model.predict_positive_proba(validation.features())?;
        let predictions = model.predict(validation.features())?;

        let confusion = ConfusionMatrix::from_predictions(validation.labels(), &predictions)?;
        let scores = ClassificationMetrics::from_confusion(&confusion);

        let roc_auc = match self.roc_auc_split {
            RocAucSplit::Train => {
                let train_proba = model.predict_positive_proba(train.features())?;
                roc_auc_score(train.labels(), &train_proba)?
            }
            RocAucSplit::Validation => roc_auc_score(validation.labels(), &probabilities)?,
        };

        debug!(
            accuracy = scores.accuracy,
            f1 = scores.f1,
            roc_auc,
            split = %self.roc_auc_split,
            "evaluated model"
        );

        Ok(EvaluationReport {
            scores,
            roc_auc,
            roc_auc_split: self.roc_auc_split,
            report: ClassificationReport::from_confusion(&confusion, &self.target_names),
            confusion,
            predictions,
            probabilities,
        })
    }
}

/// Bitwise comparison of two score vectors
pub fn predictions_identical(a: &Array1<f64>, b: &Array1<f64>) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{RandomForest, TrainedModel};
    use ndarray::{Array1, Array2};

    fn table(n: usize, offset: usize) -> RecordTable {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i + offset) * (j + 1) % 13) as f64);
        let y = Array1::from_shape_fn(n, |i| (((i + offset) % 13) > 6) as i64);
        RecordTable::new(vec!["a".into(), "b".into()], "Exited", x, y).unwrap()
    }

    fn fitted() -> TrainedModel {
        let mut model = TrainedModel::RandomForestClassifier(RandomForest::new(10).with_random_state(1));
        model.fit(table(80, 0).features(), table(80, 0).labels()).unwrap();
        model
    }

    #[test]
    fn test_confusion_sums_to_validation_size() {
        let model = fitted();
        let report = Evaluator::default().evaluate(&model, &table(40, 3), &table(80, 0)).unwrap();

        assert_eq!(report.confusion.total(), 40);
        let truth = table(40, 3).class_counts();
        assert_eq!(report.confusion.row_sums()[1], truth[&1]);
        assert_eq!(report.predictions.len(), 40);
    }

    #[test]
    fn test_roc_auc_split_selects_source() {
        let model = fitted();
        let train = table(80, 0);
        let val = table(40, 3);

        let on_train = Evaluator::new(RocAucSplit::Train).evaluate(&model, &val, &train).unwrap();
        let on_val = Evaluator::new(RocAucSplit::Validation).evaluate(&model, &val, &train).unwrap();

        let expected_train = roc_auc_score(
            train.labels(),
            &model.predict_positive_proba(train.features()).unwrap(),
        )
        .unwrap();
        assert_eq!(on_train.roc_auc, expected_train);
        assert_eq!(on_val.roc_auc, roc_auc_score(val.labels(), &on_val.probabilities).unwrap());
        assert_eq!(on_train.metric_map()["val_accuracy"], on_val.metric_map()["val_accuracy"]);
    }

    #[test]
    fn test_training_metric_names() {
        let model = fitted();
        let metrics = Evaluator::default().training_metrics(&model, &table(80, 0)).unwrap();
        let map = metrics.metric_map();
        assert!(map.contains_key("training_log_loss"));
        assert!(map.contains_key("training_roc_auc"));
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_roc_auc_split_parsing() {
        assert_eq!("train".parse::<RocAucSplit>().unwrap(), RocAucSplit::Train);
        assert_eq!("Validation".parse::<RocAucSplit>().unwrap(), RocAucSplit::Validation);
        assert!("test".parse::<RocAucSplit>().is_err());
        assert_eq!(RocAucSplit::default().to_string(), "train");
    }

    #[test]
    fn test_predictions_identical() {
        let a = Array1::from_vec(vec![0.1, 0.2]);
        assert!(predictions_identical(&a, &a.clone()));
        assert!(!predictions_identical(&a, &Array1::from_vec(vec![0.1, 0.2 + 1e-16])));
        assert!(!predictions_identical(&a, &Array1::from_vec(vec![0.1])));
    }
}
