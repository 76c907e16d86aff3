//! Storage Backend for Experiment Tracking
//!
//! Layout of the local backend:
//!
//! ```text
//! <root>/experiments.json
//! <root>/registry.json
//! <root>/<experiment_id>/<run_id>/run.json
//! <root>/<experiment_id>/<run_id>/artifacts/<artifact_path>/...
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{KolosalError, Result};
use super::registry::RegistryIndex;
use super::tracker::{Experiment, RunRecord};

/// Storage backend trait
pub trait StorageBackend: Send + Sync {
    /// Save experiments to storage
    fn save_experiments(&self, experiments: &[Experiment]) -> Result<()>;

    /// Load experiments from storage
    fn load_experiments(&self) -> Result<Vec<Experiment>>;

    /// Persist the current state of a run
    fn save_run(&self, run: &RunRecord) -> Result<()>;

    /// Load a run of a known experiment
    fn load_run(&self, experiment_id: &str, run_id: &str) -> Result<RunRecord>;

    /// All runs of an experiment, oldest first
    fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>>;

    /// Write an artifact file under a run
    fn write_artifact(&self, run: &RunRecord, relative_path: &str, bytes: &[u8]) -> Result<PathBuf>;

    /// Read an artifact file of a run
    fn read_artifact(&self, run: &RunRecord, relative_path: &str) -> Result<Vec<u8>>;

    /// Load the model registry index
    fn load_registry(&self) -> Result<RegistryIndex>;

    /// Save the model registry index
    fn save_registry(&self, index: &RegistryIndex) -> Result<()>;

    /// Find a run in any experiment
    fn find_run(&self, run_id: &str) -> Result<RunRecord> {
        for experiment in self.load_experiments()? {
            if let Ok(run) = self.load_run(&experiment.experiment_id, run_id) {
                return Ok(run);
            }
        }
        Err(KolosalError::RunNotFound(run_id.to_string()))
    }
}

/// Local file system storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend, creating `base_dir` if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn experiments_file(&self) -> PathBuf {
        self.base_dir.join("experiments.json")
    }

    fn registry_file(&self) -> PathBuf {
        self.base_dir.join("registry.json")
    }

    fn run_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.base_dir.join(experiment_id).join(run_id)
    }

    /// Artifact root of a run
    pub fn artifact_dir(&self, run: &RunRecord) -> PathBuf {
        self.run_dir(&run.experiment_id, &run.run_id).join("artifacts")
    }

    fn artifact_path(&self, run: &RunRecord, relative_path: &str) -> Result<PathBuf> {
        let rel = Path::new(relative_path);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(KolosalError::TrackingError(format!(
                "artifact path must be relative and stay inside the run: {}",
                relative_path
            )));
        }
        Ok(self.artifact_dir(run).join(rel))
    }
}

/// Write through a temporary file so readers never see a partial document
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl StorageBackend for LocalStorage {
    fn save_experiments(&self, experiments: &[Experiment]) -> Result<()> {
        write_json(&self.experiments_file(), experiments)
    }

    fn load_experiments(&self) -> Result<Vec<Experiment>> {
        let path = self.experiments_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    fn save_run(&self, run: &RunRecord) -> Result<()> {
        write_json(&self.run_dir(&run.experiment_id, &run.run_id).join("run.json"), run)
    }

    fn load_run(&self, experiment_id: &str, run_id: &str) -> Result<RunRecord> {
        let path = self.run_dir(experiment_id, run_id).join("run.json");
        if !path.is_file() {
            return Err(KolosalError::RunNotFound(run_id.to_string()));
        }
        read_json(&path)
    }

    fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        let dir = self.base_dir.join(experiment_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<RunRecord> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join("run.json");
            if path.is_file() {
                runs.push(read_json(&path)?);
            }
        }
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    fn write_artifact(&self, run: &RunRecord, relative_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(run, relative_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn read_artifact(&self, run: &RunRecord, relative_path: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(run, relative_path)?;
        fs::read(&path).map_err(|e| {
            KolosalError::TrackingError(format!("cannot read artifact {}: {}", path.display(), e))
        })
    }

    fn load_registry(&self) -> Result<RegistryIndex> {
        let path = self.registry_file();
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        read_json(&path)
    }

    fn save_registry(&self, index: &RegistryIndex) -> Result<()> {
        write_json(&self.registry_file(), index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::tracker::RunStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn run(experiment_id: &str, run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            run_name: "rfc1_sm".to_string(),
            experiment_id: experiment_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_experiments_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage.load_experiments().unwrap().is_empty());

        let exp = Experiment::new("0", "bank-churn-experiment");
        storage.save_experiments(&[exp]).unwrap();

        let loaded = storage.load_experiments().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "bank-churn-experiment");
    }

    #[test]
    fn test_runs_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.save_experiments(&[Experiment::new("0", "exp")]).unwrap();

        let r = run("0", "abc");
        storage.save_run(&r).unwrap();
        storage.write_artifact(&r, "model/model.json", b"{}").unwrap();

        assert_eq!(storage.load_run("0", "abc").unwrap().run_name, "rfc1_sm");
        assert_eq!(storage.find_run("abc").unwrap().experiment_id, "0");
        assert_eq!(storage.read_artifact(&r, "model/model.json").unwrap(), b"{}");
        assert_eq!(storage.list_runs("0").unwrap().len(), 1);
        assert!(matches!(storage.find_run("nope"), Err(KolosalError::RunNotFound(_))));
    }

    #[test]
    fn test_artifact_path_cannot_escape_run() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        let r = run("0", "abc");
        assert!(storage.write_artifact(&r, "../escape.json", b"x").is_err());
        assert!(storage.write_artifact(&r, "/abs.json", b"x").is_err());
    }
}
