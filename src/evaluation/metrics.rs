//! Binary classification metrics
//!
//! Labels are `{0, 1}` with 1 as the positive class. Precision, recall and F1
//! are 0 when their denominator is 0.

use crate::error::{KolosalError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

fn check_lengths(what: &str, a: usize, b: usize) -> Result<()> {
    if a != b {
        return Err(KolosalError::ShapeError {
            expected: format!("{} length = {}", what, a),
            actual: format!("{} length = {}", what, b),
        });
    }
    if a == 0 {
        return Err(KolosalError::EvaluationError("no samples to evaluate".into()));
    }
    Ok(())
}

fn label_index(label: i64) -> Result<usize> {
    match label {
        0 => Ok(0),
        1 => Ok(1),
        other => Err(KolosalError::EvaluationError(format!(
            "label must be 0 or 1, found {}",
            other
        ))),
    }
}

/// 2x2 confusion matrix: `counts[true][predicted]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    /// Build from raw counts, rows = true label
    pub fn from_counts(counts: [[usize; 2]; 2]) -> Self {
        Self { counts }
    }

    /// Count predictions against ground truth
    pub fn from_predictions(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<Self> {
        check_lengths("y_pred", y_true.len(), y_pred.len())?;
        let mut counts = [[0usize; 2]; 2];
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            counts[label_index(t)?][label_index(p)?] += 1;
        }
        Ok(Self { counts })
    }

    /// Count for (true label, predicted label)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn counts(&self) -> &[[usize; 2]; 2] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Samples per true class
    pub fn row_sums(&self) -> [usize; 2] {
        [self.counts[0][0] + self.counts[0][1], self.counts[1][0] + self.counts[1][1]]
    }

    /// Samples per predicted class
    pub fn col_sums(&self) -> [usize; 2] {
        [self.counts[0][0] + self.counts[1][0], self.counts[0][1] + self.counts[1][1]]
    }

    /// `(tn, fp, fn, tp)`
    pub fn ravel(&self) -> (usize, usize, usize, usize) {
        (self.counts[0][0], self.counts[0][1], self.counts[1][0], self.counts[1][1])
    }

    pub fn max(&self) -> usize {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }

    /// Row-normalized proportions. An empty row stays all zero.
    pub fn normalized(&self) -> [[f64; 2]; 2] {
        let sums = self.row_sums();
        let mut out = [[0.0; 2]; 2];
        for (i, row) in self.counts.iter().enumerate() {
            if sums[i] > 0 {
                for (j, &c) in row.iter().enumerate() {
                    out[i][j] = c as f64 / sums[i] as f64;
                }
            }
        }
        out
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.counts[0][0] + self.counts[1][1]) as f64 / total as f64
    }

    /// Precision of class `label`
    pub fn precision(&self, label: usize) -> f64 {
        let predicted = self.col_sums()[label];
        if predicted == 0 {
            0.0
        } else {
            self.counts[label][label] as f64 / predicted as f64
        }
    }

    /// Recall of class `label`
    pub fn recall(&self, label: usize) -> f64 {
        let actual = self.row_sums()[label];
        if actual == 0 {
            0.0
        } else {
            self.counts[label][label] as f64 / actual as f64
        }
    }

    /// F1 of class `label`
    pub fn f1(&self, label: usize) -> f64 {
        let p = self.precision(label);
        let r = self.recall(label);
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.max().to_string().len();
        writeln!(f, "[[{:>w$} {:>w$}]", self.counts[0][0], self.counts[0][1], w = width)?;
        write!(f, " [{:>w$} {:>w$}]]", self.counts[1][0], self.counts[1][1], w = width)
    }
}

pub fn accuracy_score(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.accuracy())
}

pub fn precision_score(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.precision(1))
}

pub fn recall_score(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.recall(1))
}

pub fn f1_score(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.f1(1))
}

/// Area under the ROC curve from positive-class scores.
///
/// Mann-Whitney rank statistic; tied scores share their average rank.
pub fn roc_auc_score(y_true: &Array1<i64>, scores: &Array1<f64>) -> Result<f64> {
    check_lengths("scores", y_true.len(), scores.len())?;
    for &t in y_true.iter() {
        label_index(t)?;
    }

    let n_pos = y_true.iter().filter(|&&t| t == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(KolosalError::EvaluationError(
            "ROC AUC is undefined when only one class is present".into(),
        ));
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err(KolosalError::EvaluationError("scores contain NaN".into()));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their mean
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if y_true[idx] == 1 {
                pos_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Mean binary cross-entropy with probabilities clipped to `[1e-15, 1 - 1e-15]`
pub fn log_loss(y_true: &Array1<i64>, proba: &Array1<f64>) -> Result<f64> {
    check_lengths("proba", y_true.len(), proba.len())?;
    const EPS: f64 = 1e-15;

    let mut total = 0.0;
    for (&t, &p) in y_true.iter().zip(proba.iter()) {
        let p = p.clamp(EPS, 1.0 - EPS);
        total -= match label_index(t)? {
            1 => p.ln(),
            _ => (1.0 - p).ln(),
        };
    }
    Ok(total / y_true.len() as f64)
}

/// Threshold metrics for the positive class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassificationMetrics {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        Self {
            accuracy: cm.accuracy(),
            precision: cm.precision(1),
            recall: cm.recall(1),
            f1: cm.f1(1),
        }
    }

    pub fn compute(y_true: &Array1<i64>, y_pred: &Array1<i64>) -> Result<Self> {
        Ok(Self::from_confusion(&ConfusionMatrix::from_predictions(y_true, y_pred)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_confusion_matrix_layout() {
        let y_true = array![1i64, 0, 1, 1, 0, 1, 0, 0];
        let y_pred = array![1i64, 0, 1, 0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred).unwrap();
        assert_eq!(cm.ravel(), (3, 1, 1, 3));
        assert_eq!(cm.row_sums(), [4, 4]);
        assert_eq!(cm.col_sums(), [4, 4]);
        assert_eq!(cm.total(), 8);
        assert_eq!(cm.get(1, 0), 1);
    }

    #[test]
    fn test_scores() {
        let y_true = array![1i64, 0, 1, 1, 0, 1, 0, 0];
        let y_pred = array![1i64, 0, 1, 0, 0, 1, 1, 0];

        assert_eq!(accuracy_score(&y_true, &y_pred).unwrap(), 0.75);
        assert_eq!(precision_score(&y_true, &y_pred).unwrap(), 0.75);
        assert_eq!(recall_score(&y_true, &y_pred).unwrap(), 0.75);
        assert!((f1_score(&y_true, &y_pred).unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division() {
        let y_true = array![0i64, 0, 1];
        let y_pred = array![0i64, 0, 0];
        assert_eq!(precision_score(&y_true, &y_pred).unwrap(), 0.0);
        assert_eq!(f1_score(&y_true, &y_pred).unwrap(), 0.0);
    }

    #[test]
    fn test_normalized_rows() {
        let cm = ConfusionMatrix::from_counts([[30, 10], [0, 0]]);
        let n = cm.normalized();
        assert_eq!(n[0], [0.75, 0.25]);
        assert_eq!(n[1], [0.0, 0.0]);
    }

    #[test]
    fn test_roc_auc() {
        let y = array![0i64, 0, 1, 1];
        assert_eq!(roc_auc_score(&y, &array![0.1, 0.4, 0.35, 0.8]).unwrap(), 0.75);
        assert_eq!(roc_auc_score(&y, &array![0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        // All tied scores give chance level
        assert_eq!(roc_auc_score(&y, &array![0.5, 0.5, 0.5, 0.5]).unwrap(), 0.5);
    }

    #[test]
    fn test_roc_auc_single_class() {
        let y = array![1i64, 1, 1];
        assert!(roc_auc_score(&y, &array![0.2, 0.5, 0.9]).is_err());
    }

    #[test]
    fn test_log_loss() {
        let y = array![1i64, 0];
        let loss = log_loss(&y, &array![0.9, 0.1]).unwrap();
        assert!((loss - (-(0.9f64).ln())).abs() < 1e-12);

        // Clipping keeps certain-but-wrong predictions finite
        assert!(log_loss(&y, &array![0.0, 1.0]).unwrap().is_finite());
    }

    #[test]
    fn test_rejects_non_binary_labels() {
        assert!(ConfusionMatrix::from_predictions(&array![0i64, 2], &array![0i64, 1]).is_err());
        assert!(ConfusionMatrix::from_predictions(&array![0i64], &array![0i64, 1]).is_err());
    }
}
