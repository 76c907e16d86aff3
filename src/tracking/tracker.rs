//! Experiment Tracker Implementation
//!
//! Runs, params, metrics, tags and model artifacts behind the
//! [`TrackingClient`] trait, with a file-backed [`LocalTracker`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{KolosalError, Result};
use crate::training::{Classifier, TrainedModel};
use super::registry::{RegisteredModelVersion, RegistryIndex};
use super::storage::{LocalStorage, StorageBackend};
use super::uri::ModelUri;

const MODEL_FILE: &str = "model.json";
const MODEL_META_FILE: &str = "MLmodel.json";

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is currently running
    Running,
    /// Run completed successfully
    Finished,
    /// Run failed
    Failed,
    /// Run was killed/stopped
    Killed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Failed => "failed",
            RunStatus::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// An experiment groups runs under a name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Experiment {
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }
}

/// Durable record of one training invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Artifact paths relative to the run's artifact root
    pub artifacts: Vec<String>,
}

impl RunRecord {
    fn new(experiment_id: &str, run_name: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            run_name: run_name.to_string(),
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

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Get run duration in seconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    /// `runs:/<run_id>/<artifact_path>`
    pub fn model_uri(&self, artifact_path: &str) -> ModelUri {
        ModelUri::run(&self.run_id, artifact_path)
    }
}

/// Named, typed column of a model signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: String,
}

/// Input and output schema stored with a model artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: Vec<ColumnSpec>,
    pub outputs: Vec<ColumnSpec>,
}

impl ModelSignature {
    /// `double` inputs named after the feature columns and one `long` output
    pub fn infer(feature_names: &[String], output_name: &str) -> Self {
        Self {
            inputs: feature_names
                .iter()
                .map(|n| ColumnSpec { name: n.clone(), dtype: "double".to_string() })
                .collect(),
            outputs: vec![ColumnSpec { name: output_name.to_string(), dtype: "long".to_string() }],
        }
    }
}

/// Metadata written next to the serialized model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifactMeta {
    pub artifact_path: String,
    pub run_id: String,
    pub flavor: String,
    pub estimator: String,
    pub signature: Option<ModelSignature>,
    /// SHA-256 of `model.json`
    pub model_digest: String,
    pub created_at: DateTime<Utc>,
    pub crate_version: String,
}

/// Result of `log_model`
#[derive(Debug, Clone)]
pub struct LoggedModel {
    pub uri: ModelUri,
    pub digest: String,
    pub registered: Option<RegisteredModelVersion>,
}

/// Hex SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Tracking operations used by the trainer and evaluator
pub trait TrackingClient: Send + Sync {
    /// Experiment new runs are created in
    fn experiment(&self) -> &Experiment;

    /// Create a run in `running` state
    fn start_run(&self, run_name: &str) -> Result<RunRecord>;

    /// Log params. Re-logging a key with a different value is an error.
    fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()>;

    /// Log a single parameter
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.log_params(run_id, &BTreeMap::from([(key.to_string(), value.to_string())]))
    }

    /// Log metrics; the latest value per key is kept
    fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()>;

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()>;

    /// Store a fitted model under `artifact_path`, optionally registering it
    fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model: &TrainedModel,
        signature: Option<ModelSignature>,
        registered_model_name: Option<&str>,
    ) -> Result<LoggedModel>;

    /// Finish a run; the record is immutable afterwards
    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord>;

    fn get_run(&self, run_id: &str) -> Result<RunRecord>;

    /// Runs of the current experiment, oldest first
    fn search_runs(&self) -> Result<Vec<RunRecord>>;

    /// Reload a model by URI, verifying its digest
    fn load_model(&self, uri: &ModelUri) -> Result<TrainedModel>;

    /// All registered model versions
    fn registered_models(&self) -> Result<Vec<RegisteredModelVersion>>;
}

/// File-backed tracking client
pub struct LocalTracker {
    storage: Arc<dyn StorageBackend>,
    experiment: Experiment,
    active: RwLock<BTreeMap<String, RunRecord>>,
    registry: RwLock<RegistryIndex>,
}

impl LocalTracker {
    /// Open the store at `dir`, creating `experiment_name` if it does not exist
    pub fn open(dir: impl Into<PathBuf>, experiment_name: &str) -> Result<Self> {
        let storage = LocalStorage::new(dir)?;
        Self::with_storage(Arc::new(storage), experiment_name)
    }

    /// Use an arbitrary storage backend
    pub fn with_storage(storage: Arc<dyn StorageBackend>, experiment_name: &str) -> Result<Self> {
        let mut experiments = storage.load_experiments()?;

        let experiment = match experiments.iter().find(|e| e.name == experiment_name) {
            Some(e) => e.clone(),
            None => {
                let next_id = experiments
                    .iter()
                    .filter_map(|e| e.experiment_id.parse::<u64>().ok())
                    .max()
                    .map_or(0, |id| id + 1);
                let e = Experiment::new(next_id.to_string(), experiment_name);
                experiments.push(e.clone());
                storage.save_experiments(&experiments)?;
                info!(experiment = experiment_name, experiment_id = %e.experiment_id, "created experiment");
                e
            }
        };

        let registry = storage.load_registry()?;

        Ok(Self {
            storage,
            experiment,
            active: RwLock::new(BTreeMap::new()),
            registry: RwLock::new(registry),
        })
    }

    /// Apply `f` to an active run and persist it
    fn update_active<F>(&self, run_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut RunRecord) -> Result<()>,
    {
        let mut active = self.active.write();
        let run = active
            .get_mut(run_id)
            .ok_or_else(|| KolosalError::RunNotActive(run_id.to_string()))?;

        // Mutate a copy so a rejected update leaves the run untouched
        let mut updated = run.clone();
        f(&mut updated)?;
        self.storage.save_run(&updated)?;
        *run = updated;
        Ok(())
    }

    fn active_snapshot(&self, run_id: &str) -> Result<RunRecord> {
        self.active
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| KolosalError::RunNotActive(run_id.to_string()))
    }

    fn load_run_artifact(&self, run_id: &str, artifact_path: &str, uri: &ModelUri) -> Result<(TrainedModel, String)> {
        let run = self.get_run(run_id)?;
        let meta_bytes = self
            .storage
            .read_artifact(&run, &format!("{}/{}", artifact_path, MODEL_META_FILE))?;
        let meta: ModelArtifactMeta = serde_json::from_slice(&meta_bytes)?;

        let model_bytes = self
            .storage
            .read_artifact(&run, &format!("{}/{}", artifact_path, MODEL_FILE))?;
        let actual = sha256_hex(&model_bytes);
        if actual != meta.model_digest {
            return Err(KolosalError::ArtifactIntegrity {
                uri: uri.to_string(),
                expected: meta.model_digest,
                actual,
            });
        }

        Ok((TrainedModel::from_bytes(&model_bytes)?, actual))
    }
}

impl TrackingClient for LocalTracker {
    fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    fn start_run(&self, run_name: &str) -> Result<RunRecord> {
        let run = RunRecord::new(&self.experiment.experiment_id, run_name);
        self.storage.save_run(&run)?;
        self.active.write().insert(run.run_id.clone(), run.clone());

        info!(run_id = %run.run_id, run_name, status = %run.status, "started run");
        Ok(run)
    }

    fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        self.update_active(run_id, |run| {
            for (key, value) in params {
                match run.params.get(key) {
                    Some(existing) if existing != value => {
                        return Err(KolosalError::TrackingError(format!(
                            "param '{}' already logged as '{}', refusing '{}'",
                            key, existing, value
                        )));
                    }
                    _ => {
                        run.params.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(())
        })?;
        debug!(run_id, n = params.len(), "logged params");
        Ok(())
    }

    fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        if let Some((key, _)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(KolosalError::TrackingError(format!("metric '{}' is not finite", key)));
        }
        self.update_active(run_id, |run| {
            run.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
            Ok(())
        })?;
        debug!(run_id, n = metrics.len(), "logged metrics");
        Ok(())
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update_active(run_id, |run| {
            run.tags.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model: &TrainedModel,
        signature: Option<ModelSignature>,
        registered_model_name: Option<&str>,
    ) -> Result<LoggedModel> {
        if !model.is_fitted() {
            return Err(KolosalError::ModelNotFitted);
        }
        let run = self.active_snapshot(run_id)?;

        let model_bytes = model.to_bytes()?;
        let digest = sha256_hex(&model_bytes);
        let meta = ModelArtifactMeta {
            artifact_path: artifact_path.to_string(),
            run_id: run_id.to_string(),
            flavor: model.flavor().to_string(),
            estimator: model.estimator_name().to_string(),
            signature,
            model_digest: digest.clone(),
            created_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        self.storage
            .write_artifact(&run, &format!("{}/{}", artifact_path, MODEL_FILE), &model_bytes)?;
        self.storage.write_artifact(
            &run,
            &format!("{}/{}", artifact_path, MODEL_META_FILE),
            &serde_json::to_vec_pretty(&meta)?,
        )?;

        self.update_active(run_id, |run| {
            if !run.artifacts.iter().any(|a| a == artifact_path) {
                run.artifacts.push(artifact_path.to_string());
            }
            Ok(())
        })?;

        let uri = ModelUri::run(run_id, artifact_path);
        let registered = match registered_model_name {
            Some(name) => {
                let mut registry = self.registry.write();
                let entry = registry.register(name, run_id, uri.to_string(), digest.clone())?;
                self.storage.save_registry(&registry)?;
                info!(model = name, version = entry.version, source = %entry.source, "registered model");
                Some(entry)
            }
            None => None,
        };

        info!(run_id, uri = %uri, bytes = model_bytes.len(), "logged model");
        Ok(LoggedModel { uri, digest, registered })
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        if status == RunStatus::Running {
            return Err(KolosalError::TrackingError(
                "a run cannot be ended with status 'running'".to_string(),
            ));
        }

        let mut run = self
            .active
            .write()
            .remove(run_id)
            .ok_or_else(|| KolosalError::RunNotActive(run_id.to_string()))?;

        run.status = status;
        run.end_time = Some(Utc::now());
        self.storage.save_run(&run)?;

        info!(run_id, run_name = %run.run_name, status = %status, "ended run");
        Ok(run)
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        if let Some(run) = self.active.read().get(run_id) {
            return Ok(run.clone());
        }
        match self.storage.load_run(&self.experiment.experiment_id, run_id) {
            Ok(run) => Ok(run),
            Err(KolosalError::RunNotFound(_)) => self.storage.find_run(run_id),
            Err(e) => Err(e),
        }
    }

    fn search_runs(&self) -> Result<Vec<RunRecord>> {
        self.storage.list_runs(&self.experiment.experiment_id)
    }

    fn load_model(&self, uri: &ModelUri) -> Result<TrainedModel> {
        let model = match uri {
            ModelUri::Run { run_id, artifact_path } => self.load_run_artifact(run_id, artifact_path, uri)?.0,
            ModelUri::Registered { name, version } => {
                let entry = self.registry.read().get(name, *version)?.clone();
                let source: ModelUri = entry.source.parse()?;
                let (run_id, artifact_path) = match &source {
                    ModelUri::Run { run_id, artifact_path } => (run_id, artifact_path),
                    ModelUri::Registered { .. } => {
                        return Err(KolosalError::RegistryError(format!(
                            "registered source must be a run URI: {}",
                            entry.source
                        )))
                    }
                };
                let (model, digest) = self.load_run_artifact(run_id, artifact_path, uri)?;
                if digest != entry.digest {
                    return Err(KolosalError::ArtifactIntegrity {
                        uri: uri.to_string(),
                        expected: entry.digest,
                        actual: digest,
                    });
                }
                model
            }
        };

        debug!(uri = %uri, estimator = model.estimator_name(), "loaded model");
        Ok(model)
    }

    fn registered_models(&self) -> Result<Vec<RegisteredModelVersion>> {
        Ok(self.registry.read().all_versions().cloned().collect())
    }
}

/// Scoped run: ends the run as `failed` if dropped before `finish`.
pub struct ActiveRun<'a> {
    client: &'a dyn TrackingClient,
    run: RunRecord,
    closed: bool,
}

impl<'a> ActiveRun<'a> {
    pub fn start(client: &'a dyn TrackingClient, run_name: &str) -> Result<Self> {
        let run = client.start_run(run_name)?;
        Ok(Self { client, run, closed: false })
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn run_name(&self) -> &str {
        &self.run.run_name
    }

    pub fn client(&self) -> &'a dyn TrackingClient {
        self.client
    }

    pub fn log_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        self.client.log_params(&self.run.run_id, params)
    }

    pub fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.client.log_metrics(&self.run.run_id, metrics)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.client.set_tag(&self.run.run_id, key, value)
    }

    pub fn log_model(
        &self,
        artifact_path: &str,
        model: &TrainedModel,
        signature: Option<ModelSignature>,
        registered_model_name: Option<&str>,
    ) -> Result<LoggedModel> {
        self.client
            .log_model(&self.run.run_id, artifact_path, model, signature, registered_model_name)
    }

    /// End as `finished`
    pub fn finish(self) -> Result<RunRecord> {
        self.close(RunStatus::Finished)
    }

    /// End as `failed`
    pub fn fail(self) -> Result<RunRecord> {
        self.close(RunStatus::Failed)
    }

    fn close(mut self, status: RunStatus) -> Result<RunRecord> {
        self.closed = true;
        self.client.end_run(&self.run.run_id, status)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(run_id = %self.run.run_id, run_name = %self.run.run_name, "run left open, marking failed");
        if let Err(e) = self.client.end_run(&self.run.run_id, RunStatus::Failed) {
            warn!(run_id = %self.run.run_id, error = %e, "could not end run");
        }
    }
}
