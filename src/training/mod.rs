//! Model training
//!
//! Binary classifiers for churn prediction:
//! - Decision trees and Random Forests
//! - LightGBM-style leaf-wise gradient boosting
//!
//! plus job configuration and the tracked [`Trainer`].

mod config;
mod models;
mod trainer;
pub mod decision_tree;
pub mod random_forest;
pub mod lightgbm;

pub use config::{default_jobs, ModelSpec, RandomForestParams, TrainingJob};
pub use models::{Classifier, TrainedModel};
pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use random_forest::{MaxFeatures, RandomForest};
pub use lightgbm::{BoostingType, LightGBMClassifier, LightGBMConfig};
pub use trainer::{Trainer, TrainingOutcome, MODEL_ARTIFACT_PATH};
