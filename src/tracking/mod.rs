//! Experiment tracking and model registry
//!
//! Runs record params, metrics, tags and model artifacts under an
//! experiment. Logged models can be registered under a name and reloaded
//! by `runs:/` or `models:/` URI.

mod registry;
mod storage;
mod tracker;
mod uri;

pub use registry::{RegisteredModelVersion, RegistryIndex};
pub use storage::{LocalStorage, StorageBackend};
pub use tracker::{
    sha256_hex, ActiveRun, ColumnSpec, Experiment, LocalTracker, LoggedModel, ModelArtifactMeta,
    ModelSignature, RunRecord, RunStatus, TrackingClient,
};
pub use uri::{ModelUri, VersionSelector};
