//! Kolosal Churn - bank customer churn training pipeline
//!
//! This crate provides:
//! - Versioned lakehouse tables and seeded train/validation/test splits
//! - SMOTE balancing of the training partition
//! - Random Forest and LightGBM-style binary classifiers
//! - Experiment tracking with a model registry
//! - Evaluation metrics, classification reports and confusion-matrix heatmaps
//!
//! # Modules
//!
//! - [`data`] - Table ingestion, partitioning and persistence
//! - [`synthetic`] - Synthetic minority over-sampling (SMOTE)
//! - [`training`] - Classifiers, job configuration and the tracked trainer
//! - [`evaluation`] - Metrics, ROC AUC, confusion matrix, classification report
//! - [`tracking`] - Runs, artifacts and the model registry
//! - [`visualization`] - Confusion-matrix rendering
//! - [`pipeline`] - The end-to-end churn pipeline
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data processing
pub mod data;
pub mod synthetic;

// Models
pub mod training;
pub mod evaluation;

// Tracking
pub mod tracking;

// Presentation
pub mod visualization;

// Orchestration
pub mod pipeline;
pub mod utils;

// Services
pub mod cli;

pub use error::{KolosalError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{KolosalError, Result};

    // Data
    pub use crate::data::{three_way_split, DataSplit, Lakehouse, RecordTable, WriteMode};
    pub use crate::synthetic::{Sampler, SMOTE};

    // Training
    pub use crate::training::{
        default_jobs, Classifier, LightGBMClassifier, LightGBMConfig, ModelSpec, RandomForest,
        TrainedModel, Trainer, TrainingJob,
    };

    // Evaluation
    pub use crate::evaluation::{ConfusionMatrix, EvaluationReport, Evaluator, RocAucSplit};

    // Tracking
    pub use crate::tracking::{LocalTracker, ModelUri, RunStatus, TrackingClient};

    // Pipeline
    pub use crate::pipeline::{ChurnPipeline, PipelineConfig, PipelineSummary};
    pub use crate::visualization::ConfusionPlot;
}
