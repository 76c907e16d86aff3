//! Model registry
//!
//! Named models with integer versions starting at 1. Each version points at
//! the run artifact it was registered from and records its SHA-256 digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KolosalError, Result};
use super::uri::VersionSelector;

/// One registered version of a named model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModelVersion {
    pub name: String,
    pub version: u32,
    pub run_id: String,
    /// `runs:/<run_id>/<artifact_path>`
    pub source: String,
    /// SHA-256 of the serialized model
    pub digest: String,
    pub registered_at: DateTime<Utc>,
}

/// Registry index, persisted as `registry.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndex {
    /// Versions by model name, ascending
    pub models: BTreeMap<String, Vec<RegisteredModelVersion>>,
}

impl RegistryIndex {
    /// Add the next version of `name`
    pub fn register(
        &mut self,
        name: &str,
        run_id: &str,
        source: String,
        digest: String,
    ) -> Result<RegisteredModelVersion> {
        if name.is_empty() || name.contains('/') {
            return Err(KolosalError::RegistryError(format!(
                "invalid registered model name: '{}'",
                name
            )));
        }

        let versions = self.models.entry(name.to_string()).or_default();
        let version = versions.last().map_or(1, |v| v.version + 1);

        let entry = RegisteredModelVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            source,
            digest,
            registered_at: Utc::now(),
        };
        versions.push(entry.clone());
        Ok(entry)
    }

    /// Resolve a version selector
    pub fn get(&self, name: &str, selector: VersionSelector) -> Result<&RegisteredModelVersion> {
        let versions = self
            .models
            .get(name)
            .ok_or_else(|| KolosalError::RegistryError(format!("Model not found: {}", name)))?;

        let found = match selector {
            VersionSelector::Latest => versions.last(),
            VersionSelector::Number(n) => versions.iter().find(|v| v.version == n),
        };

        found.ok_or_else(|| {
            KolosalError::RegistryError(format!("Version not found: {}/{}", name, selector))
        })
    }

    /// Latest version of every registered model
    pub fn latest_versions(&self) -> Vec<&RegisteredModelVersion> {
        self.models.values().filter_map(|v| v.last()).collect()
    }

    /// Every version of every model, grouped by name
    pub fn all_versions(&self) -> impl Iterator<Item = &RegisteredModelVersion> {
        self.models.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increment() {
        let mut index = RegistryIndex::default();
        let v1 = index.register("rfc1_sm", "a", "runs:/a/model".into(), "d1".into()).unwrap();
        let v2 = index.register("rfc1_sm", "b", "runs:/b/model".into(), "d2".into()).unwrap();
        let other = index.register("lgbm_sm", "c", "runs:/c/model".into(), "d3".into()).unwrap();

        assert_eq!((v1.version, v2.version, other.version), (1, 2, 1));
        assert_eq!(index.get("rfc1_sm", VersionSelector::Latest).unwrap().run_id, "b");
        assert_eq!(index.get("rfc1_sm", VersionSelector::Number(1)).unwrap().run_id, "a");
        assert_eq!(index.latest_versions().len(), 2);
        assert_eq!(index.all_versions().count(), 3);
    }

    #[test]
    fn test_missing_lookups() {
        let mut index = RegistryIndex::default();
        assert!(index.get("x", VersionSelector::Latest).is_err());
        index.register("x", "a", "runs:/a/model".into(), "d".into()).unwrap();
        assert!(index.get("x", VersionSelector::Number(3)).is_err());
        assert!(index.register("a/b", "a", String::new(), String::new()).is_err());
    }
}
