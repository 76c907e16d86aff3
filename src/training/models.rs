//! Classifier trait and the serializable fitted-model enum

use crate::error::{KolosalError, Result};
use super::lightgbm::LightGBMClassifier;
use super::random_forest::RandomForest;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Binary classifier over `f64` features and `{0, 1}` labels
pub trait Classifier: Send + Sync {
    /// Fit the model to training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()>;

    /// Class probabilities, one row per sample, columns `[P(0), P(1)]`
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Predicted class: 1 when `P(1) > P(0)`
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| (row[1] > row[0]) as i64)
            .collect())
    }

    /// Probability of the positive class
    fn predict_positive_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.column(1).to_owned())
    }

    /// Get feature importances (if available)
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }

    /// Number of features seen during fit
    fn n_features(&self) -> usize;

    fn is_fitted(&self) -> bool;
}

/// Shared input validation for `Classifier::fit`
pub(crate) fn check_fit_inputs(x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(KolosalError::TrainingError("Empty dataset".into()));
    }
    if let Some(bad) = y.iter().find(|&&v| v != 0 && v != 1) {
        return Err(KolosalError::TrainingError(format!(
            "labels must be 0 or 1, found {}",
            bad
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(KolosalError::TrainingError(
            "features contain NaN or infinite values".into(),
        ));
    }
    Ok(())
}

/// A fitted model as stored in a run artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "estimator", content = "model")]
pub enum TrainedModel {
    RandomForestClassifier(RandomForest),
    LGBMClassifier(LightGBMClassifier),
}

impl TrainedModel {
    /// Estimator class name, logged as the `estimator` param
    pub fn estimator_name(&self) -> &'static str {
        match self {
            TrainedModel::RandomForestClassifier(_) => "RandomForestClassifier",
            TrainedModel::LGBMClassifier(_) => "LGBMClassifier",
        }
    }

    /// Model flavor recorded in the artifact metadata
    pub fn flavor(&self) -> &'static str {
        match self {
            TrainedModel::RandomForestClassifier(_) => "random_forest",
            TrainedModel::LGBMClassifier(_) => "lightgbm",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedModel::RandomForestClassifier(m) => m,
            TrainedModel::LGBMClassifier(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            TrainedModel::RandomForestClassifier(m) => m,
            TrainedModel::LGBMClassifier(m) => m,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Classifier for TrainedModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.inner().predict_proba(x)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.inner().feature_importances()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }
}
