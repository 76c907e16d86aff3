//! Pipeline configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::sample::LABEL_COLUMN;
use crate::error::{KolosalError, Result};
use crate::evaluation::RocAucSplit;
use crate::training::{default_jobs, TrainingJob};

/// SMOTE settings for the training partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoteConfig {
    pub k_neighbors: usize,
    /// Target minority/majority ratio after resampling
    pub sampling_strategy: f64,
    /// Defaults to the pipeline seed
    pub seed: Option<u64>,
}

impl Default for SmoteConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            sampling_strategy: 1.0,
            seed: None,
        }
    }
}

/// End-to-end churn pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub lakehouse_root: PathBuf,
    pub input_table: String,
    pub output_table: String,
    pub label_column: String,
    /// Fraction of all rows held out as test
    pub test_size: f64,
    /// Fraction of the non-test rows held out as validation
    pub validation_size: f64,
    pub experiment_name: String,
    pub tracking_dir: PathBuf,
    pub roc_auc_split: RocAucSplit,
    pub class_names: [String; 2],
    pub normalize_confusion: bool,
    /// Write one confusion-matrix SVG per job here when set
    pub report_dir: Option<PathBuf>,
    pub smote: SmoteConfig,
    pub jobs: Vec<TrainingJob>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            lakehouse_root: PathBuf::from("./lakehouse"),
            input_table: "df_clean".to_string(),
            output_table: "df_test".to_string(),
            label_column: LABEL_COLUMN.to_string(),
            test_size: 0.20,
            validation_size: 0.25,
            experiment_name: "bank-churn-experiment".to_string(),
            tracking_dir: PathBuf::from("./mlruns"),
            roc_auc_split: RocAucSplit::Train,
            class_names: ["Non Churn".to_string(), "Churn".to_string()],
            normalize_confusion: false,
            report_dir: None,
            smote: SmoteConfig::default(),
            jobs: default_jobs(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            KolosalError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            KolosalError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lakehouse_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.lakehouse_root = root.into();
        self
    }

    pub fn with_tracking_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tracking_dir = dir.into();
        self
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    pub fn with_roc_auc_split(mut self, split: RocAucSplit) -> Self {
        self.roc_auc_split = split;
        self
    }

    pub fn with_normalize_confusion(mut self, normalize: bool) -> Self {
        self.normalize_confusion = normalize;
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<TrainingJob>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_smote(mut self, smote: SmoteConfig) -> Self {
        self.smote = smote;
        self
    }

    /// Seed used by SMOTE
    pub fn smote_seed(&self) -> u64 {
        self.smote.seed.unwrap_or(self.seed)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, value: String, reason: &str| KolosalError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };

        for (name, v) in [("test_size", self.test_size), ("validation_size", self.validation_size)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(invalid(name, v.to_string(), "must be in (0, 1)"));
            }
        }
        if self.smote.k_neighbors == 0 {
            return Err(invalid("smote.k_neighbors", "0".to_string(), "must be at least 1"));
        }
        let ratio = self.smote.sampling_strategy;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid("smote.sampling_strategy", ratio.to_string(), "must be in (0, 1]"));
        }
        for (name, v) in [
            ("input_table", &self.input_table),
            ("output_table", &self.output_table),
            ("label_column", &self.label_column),
            ("experiment_name", &self.experiment_name),
        ] {
            if v.trim().is_empty() {
                return Err(KolosalError::ConfigError(format!("{} must not be empty", name)));
            }
        }
        if self.input_table == self.output_table {
            return Err(KolosalError::ConfigError(format!(
                "output table '{}' would overwrite the input",
                self.output_table
            )));
        }
        if self.jobs.is_empty() {
            return Err(KolosalError::ConfigError("no training jobs configured".to_string()));
        }

        let mut names: Vec<&str> = self.jobs.iter().map(|j| j.run_name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(KolosalError::ConfigError(format!("duplicate job name '{}'", w[0])));
        }
        for job in &self.jobs {
            job.spec.build()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.seed, 12345);
        assert_eq!(config.smote_seed(), 12345);
        assert_eq!(config.roc_auc_split, RocAucSplit::Train);
        assert_eq!(config.jobs.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"seed": 7, "roc_auc_split": "validation", "smote": {"seed": 3}}"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.roc_auc_split, RocAucSplit::Validation);
        assert_eq!(config.smote_seed(), 3);
        assert_eq!(config.smote.k_neighbors, 5);
        assert_eq!(config.input_table, "df_clean");
    }

    #[test]
    fn test_smote_override() {
        let config = PipelineConfig::default().with_smote(SmoteConfig {
            k_neighbors: 3,
            sampling_strategy: 0.5,
            seed: Some(9),
        });
        assert_eq!(config.smote_seed(), 9);
        assert!(config.validate().is_ok());

        let config = config.with_smote(SmoteConfig {
            sampling_strategy: 1.5,
            ..SmoteConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.json");
        PipelineConfig::default().with_seed(99).to_file(&path).unwrap();
        let back = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(back.seed, 99);
        assert_eq!(back.jobs[2].run_name, "lgbm_sm");
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = PipelineConfig::default();
        config.test_size = 1.0;
        assert!(config.validate().is_err());

        let config = PipelineConfig::default().with_jobs(Vec::new());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.output_table = config.input_table.clone();
        assert!(config.validate().is_err());

        let mut jobs = default_jobs();
        jobs.push(jobs[0].clone());
        assert!(PipelineConfig::default().with_jobs(jobs).validate().is_err());
    }
}
