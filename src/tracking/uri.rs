//! Model URIs: `runs:/<run_id>/<artifact_path>` and `models:/<name>/<version|latest>`

use crate::error::{KolosalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which registered version a `models:/` URI points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSelector {
    Latest,
    Number(u32),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Location of a logged model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelUri {
    /// Artifact of a specific run
    Run { run_id: String, artifact_path: String },
    /// Version of a registered model
    Registered { name: String, version: VersionSelector },
}

impl ModelUri {
    /// `runs:/<run_id>/<artifact_path>`
    pub fn run(run_id: impl Into<String>, artifact_path: impl Into<String>) -> Self {
        ModelUri::Run {
            run_id: run_id.into(),
            artifact_path: artifact_path.into(),
        }
    }

    /// `models:/<name>/<version>`
    pub fn registered(name: impl Into<String>, version: VersionSelector) -> Self {
        ModelUri::Registered {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelUri::Run { run_id, artifact_path } => write!(f, "runs:/{}/{}", run_id, artifact_path),
            ModelUri::Registered { name, version } => write!(f, "models:/{}/{}", name, version),
        }
    }
}

impl FromStr for ModelUri {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KolosalError::InvalidModelUri(s.to_string());

        if let Some(rest) = s.strip_prefix("runs:/") {
            let (run_id, path) = rest.split_once('/').ok_or_else(invalid)?;
            let path = path.trim_matches('/');
            if run_id.is_empty() || path.is_empty() || path.split('/').any(|seg| seg == "..") {
                return Err(invalid());
            }
            return Ok(ModelUri::run(run_id, path));
        }

        if let Some(rest) = s.strip_prefix("models:/") {
            let (name, version) = rest.trim_end_matches('/').rsplit_once('/').ok_or_else(invalid)?;
            if name.is_empty() || name.contains('/') {
                return Err(invalid());
            }
            let version = if version.eq_ignore_ascii_case("latest") {
                VersionSelector::Latest
            } else {
                match version.parse::<u32>() {
                    Ok(n) if n > 0 => VersionSelector::Number(n),
                    _ => return Err(invalid()),
                }
            };
            return Ok(ModelUri::registered(name, version));
        }

        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_uri() {
        let uri: ModelUri = "runs:/4f2a9c/model".parse().unwrap();
        assert_eq!(uri, ModelUri::run("4f2a9c", "model"));
        assert_eq!(uri.to_string(), "runs:/4f2a9c/model");
    }

    #[test]
    fn test_parse_registered_uri() {
        let uri: ModelUri = "models:/rfc1_sm/2".parse().unwrap();
        assert_eq!(uri, ModelUri::registered("rfc1_sm", VersionSelector::Number(2)));

        let latest: ModelUri = "models:/lgbm_sm/latest".parse().unwrap();
        assert_eq!(latest.to_string(), "models:/lgbm_sm/latest");
    }

    #[test]
    fn test_reject_malformed() {
        for bad in ["runs:/abc", "runs://model", "runs:/abc/../x", "models:/x", "models:/x/0", "s3://x/y"] {
            assert!(
                matches!(bad.parse::<ModelUri>(), Err(KolosalError::InvalidModelUri(_))),
                "accepted {}",
                bad
            );
        }
    }
}
