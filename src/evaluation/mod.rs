//! Model evaluation
//!
//! Threshold metrics, ROC AUC, log loss, the confusion matrix and an
//! sklearn-style classification report.

mod evaluator;
pub mod metrics;
mod report;

pub use evaluator::{predictions_identical, EvaluationReport, Evaluator, RocAucSplit, TrainingMetrics};
pub use metrics::{ClassificationMetrics, ConfusionMatrix};
pub use report::{ClassScores, ClassificationReport};
