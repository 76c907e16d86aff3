//! Per-class classification report

use super::metrics::ConfusionMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Precision, recall, F1 and support for one row of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class scores plus accuracy and macro/weighted averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    /// Build from a confusion matrix; `target_names[i]` names label `i`
    pub fn from_confusion(cm: &ConfusionMatrix, target_names: &[String]) -> Self {
        let support = cm.row_sums();
        let total = cm.total();

        let classes: Vec<ClassScores> = (0..2)
            .map(|i| ClassScores {
                label: target_names.get(i).cloned().unwrap_or_else(|| i.to_string()),
                precision: cm.precision(i),
                recall: cm.recall(i),
                f1: cm.f1(i),
                support: support[i],
            })
            .collect();

        let n = classes.len() as f64;
        let macro_avg = ClassScores {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };

        let weighted = |f: fn(&ClassScores) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = ClassScores {
            label: "weighted avg".to_string(),
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            support: total,
        };

        Self {
            accuracy: cm.accuracy(),
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>w$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support",
            w = width
        )?;
        writeln!(f)?;

        let row = |f: &mut fmt::Formatter<'_>, c: &ClassScores| {
            writeln!(
                f,
                "{:>w$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support,
                w = width
            )
        };

        for c in &self.classes {
            row(f, c)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>w$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support,
            w = width
        )?;
        row(f, &self.macro_avg)?;
        row(f, &self.weighted_avg)
    }
}
