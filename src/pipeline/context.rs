//! Typed stage outputs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use polars::prelude::DataFrame;
use serde::Serialize;

use crate::data::{DataSplit, RecordTable, TableCommit};
use crate::error::{KolosalError, Result};
use crate::evaluation::EvaluationReport;
use crate::tracking::{ModelUri, RegisteredModelVersion};

/// Output of the ingest stage
#[derive(Debug, Clone)]
pub struct Ingested {
    /// Source frame with original dtypes
    pub frame: DataFrame,
    pub table: RecordTable,
}

/// Output of the split stage
#[derive(Debug, Clone)]
pub struct Partitions {
    pub split: DataSplit,
    pub train: RecordTable,
    pub validation: RecordTable,
    pub test: RecordTable,
}

impl Partitions {
    /// Class counts of each partition, in train/validation/test order
    pub fn class_counts(&self) -> [BTreeMap<i64, usize>; 3] {
        [
            self.train.class_counts(),
            self.validation.class_counts(),
            self.test.class_counts(),
        ]
    }
}

/// Training partition after SMOTE
#[derive(Debug, Clone)]
pub struct BalancedTrainingSet {
    /// Original training rows followed by synthetic rows
    pub table: RecordTable,
    pub original_rows: usize,
    pub n_synthetic: BTreeMap<i64, usize>,
}

impl BalancedTrainingSet {
    pub fn total_synthetic(&self) -> usize {
        self.n_synthetic.values().sum()
    }
}

/// Evaluation of one trained job, live and after reloading
#[derive(Debug, Clone)]
pub struct ModelAssessment {
    pub run_name: String,
    pub title: String,
    pub run_id: String,
    pub model_uri: ModelUri,
    pub registered: Option<RegisteredModelVersion>,
    pub live: EvaluationReport,
    pub reloaded: EvaluationReport,
    /// Live and reloaded probabilities agree bit for bit
    pub identical: bool,
    /// SVG written by the report stage
    pub plot_path: Option<PathBuf>,
}

/// Everything the stages produced, filled in as they complete
#[derive(Debug, Default)]
pub struct PipelineContext {
    pub ingested: Option<Ingested>,
    pub partitions: Option<Partitions>,
    pub test_commit: Option<TableCommit>,
    pub balanced: Option<BalancedTrainingSet>,
    pub assessments: Vec<ModelAssessment>,
    pub timings: Vec<(String, Duration)>,
}

fn missing(stage: &str) -> KolosalError {
    KolosalError::ValidationError(format!("stage '{}' has not run", stage))
}

impl PipelineContext {
    pub fn ingested(&self) -> Result<&Ingested> {
        self.ingested.as_ref().ok_or_else(|| missing("ingest"))
    }

    pub fn partitions(&self) -> Result<&Partitions> {
        self.partitions.as_ref().ok_or_else(|| missing("split"))
    }

    pub fn balanced(&self) -> Result<&BalancedTrainingSet> {
        self.balanced.as_ref().ok_or_else(|| missing("balance"))
    }

    pub fn record_timing(&mut self, stage: &str, elapsed: Duration) {
        self.timings.push((stage.to_string(), elapsed));
    }

    /// Summary of the finished pipeline
    pub fn summary(&self, experiment_id: &str) -> Result<PipelineSummary> {
        let partitions = self.partitions()?;
        let balanced = self.balanced()?;
        Ok(PipelineSummary {
            experiment_id: experiment_id.to_string(),
            rows: self.ingested()?.table.n_rows(),
            train_rows: partitions.train.n_rows(),
            validation_rows: partitions.validation.n_rows(),
            test_rows: partitions.test.n_rows(),
            balanced_rows: balanced.table.n_rows(),
            balanced_class_counts: balanced.table.class_counts(),
            test_table_version: self.test_commit.as_ref().map(|c| c.version),
            models: self
                .assessments
                .iter()
                .map(|a| ModelSummary {
                    run_name: a.run_name.clone(),
                    run_id: a.run_id.clone(),
                    model_uri: a.model_uri.to_string(),
                    registered_version: a.registered.as_ref().map(|r| r.version),
                    accuracy: a.live.scores.accuracy,
                    precision: a.live.scores.precision,
                    recall: a.live.scores.recall,
                    f1: a.live.scores.f1,
                    roc_auc: a.live.roc_auc,
                    confusion: *a.live.confusion.counts(),
                    reload_identical: a.identical,
                })
                .collect(),
            timings_secs: self
                .timings
                .iter()
                .map(|(stage, d)| (stage.clone(), d.as_secs_f64()))
                .collect(),
        })
    }
}

/// Per-model line of the summary
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub run_name: String,
    pub run_id: String,
    pub model_uri: String,
    pub registered_version: Option<u32>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub confusion: [[usize; 2]; 2],
    pub reload_identical: bool,
}

/// Result of a full pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub experiment_id: String,
    pub rows: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    pub balanced_rows: usize,
    pub balanced_class_counts: BTreeMap<i64, usize>,
    pub test_table_version: Option<u64>,
    pub models: Vec<ModelSummary>,
    pub timings_secs: Vec<(String, f64)>,
}

impl PipelineSummary {
    /// Every model reloaded to bitwise-identical predictions
    pub fn all_reloads_identical(&self) -> bool {
        self.models.iter().all(|m| m.reload_identical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stage_errors() {
        let ctx = PipelineContext::default();
        assert!(matches!(ctx.ingested(), Err(KolosalError::ValidationError(_))));
        assert!(ctx.partitions().is_err());
        assert!(ctx.summary("0").is_err());
    }
}
