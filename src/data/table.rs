//! Typed record table: feature matrix plus binary label

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Feature matrix with a binary label vector and the column schema it came from.
///
/// Row count and schema are fixed once constructed; every derived table
/// (partitions, balanced training sets) is a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTable {
    feature_names: Vec<String>,
    label_column: String,
    features: Array2<f64>,
    labels: Array1<i64>,
}

/// Label values as `i64`. Integer and boolean columns are cast; float
/// columns must hold exactly 0.0 or 1.0; any other dtype is rejected.
fn label_values(label: &Series) -> Result<Array1<i64>> {
    let dtype = label.dtype();
    if dtype.is_float() {
        let values = label.cast(&DataType::Float64)?;
        if let Some(bad) = values.f64()?.into_no_null_iter().find(|&v| v != 0.0 && v != 1.0) {
            return Err(KolosalError::ValidationError(format!(
                "label must be binary (0 or 1), found {}",
                bad
            )));
        }
        return Ok(values.f64()?.into_no_null_iter().map(|v| v as i64).collect());
    }
    if !(dtype.is_integer() || dtype == &DataType::Boolean) {
        return Err(KolosalError::DataError(format!(
            "label column '{}' has unsupported dtype {}",
            label.name(),
            dtype
        )));
    }

    let values = label.strict_cast(&DataType::Int64)?;
    if values.null_count() > 0 {
        return Err(KolosalError::DataError(format!(
            "label column '{}' has values that do not fit Int64",
            label.name()
        )));
    }
    Ok(values.i64()?.into_no_null_iter().collect())
}

impl RecordTable {
    /// Build a table from already-extracted arrays
    pub fn new(
        feature_names: Vec<String>,
        label_column: impl Into<String>,
        features: Array2<f64>,
        labels: Array1<i64>,
    ) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} labels", features.nrows()),
                actual: format!("{} labels", labels.len()),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} feature columns", feature_names.len()),
                actual: format!("{} feature columns", features.ncols()),
            });
        }
        if let Some(bad) = labels.iter().find(|&&l| l != 0 && l != 1) {
            return Err(KolosalError::ValidationError(format!(
                "label must be binary (0 or 1), found {}",
                bad
            )));
        }

        Ok(Self {
            feature_names,
            label_column: label_column.into(),
            features,
            labels,
        })
    }

    /// Extract a table from a DataFrame. Every column except `label_column`
    /// becomes a feature and is cast to `Float64`.
    pub fn from_dataframe(df: &DataFrame, label_column: &str) -> Result<Self> {
        let label = df
            .column(label_column)
            .map_err(|_| KolosalError::FeatureNotFound(label_column.to_string()))?
            .as_materialized_series();

        if label.null_count() > 0 {
            return Err(KolosalError::DataError(format!(
                "label column '{}' contains {} null values",
                label_column,
                label.null_count()
            )));
        }

        let labels = label_values(label)?;

        let feature_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != label_column)
            .map(|name| name.to_string())
            .collect();

        if feature_names.is_empty() {
            return Err(KolosalError::DataError(
                "table has no feature columns".to_string(),
            ));
        }

        let features = columns_to_array2(df, &feature_names)?;
        Self::new(feature_names, label_column, features, labels)
    }

    /// Convert back into a DataFrame of `Float64` features, optionally with
    /// the `Int64` label column appended.
    pub fn to_dataframe(&self, include_label: bool) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self
            .feature_names
            .iter()
            .zip(self.features.axis_iter(Axis(1)))
            .map(|(name, values)| Column::new(name.as_str().into(), values.to_vec()))
            .collect();

        if include_label {
            columns.push(Column::new(
                self.label_column.as_str().into(),
                self.labels.to_vec(),
            ));
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Rows at `indices`, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            label_column: self.label_column.clone(),
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<i64> {
        &self.labels
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    /// Count of rows per label value
    pub fn class_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for &label in self.labels.iter() {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// Fraction of rows with label 1
    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l == 1).count() as f64 / self.labels.len() as f64
    }
}

/// Extract named columns from a DataFrame into a row-major `Array2<f64>`.
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let series = df
                .column(col_name)
                .map_err(|_| KolosalError::FeatureNotFound(col_name.clone()))?
                .as_materialized_series();

            if matches!(series.dtype(), DataType::String) {
                return Err(KolosalError::DataError(format!(
                    "feature column '{}' is not numeric",
                    col_name
                )));
            }
            if series.null_count() > 0 {
                return Err(KolosalError::DataError(format!(
                    "feature column '{}' contains {} null values",
                    col_name,
                    series.null_count()
                )));
            }

            let values: Vec<f64> = series
                .cast(&DataType::Float64)?
                .f64()?
                .into_no_null_iter()
                .collect();
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| col_data[c][r]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        df!(
            "CreditScore" => &[600i64, 700, 650, 720],
            "Balance" => &[0.0, 1200.5, 300.0, 50.0],
            "IsActiveMember" => &[true, false, true, true],
            "Exited" => &[0i64, 1, 0, 1]
        )
        .unwrap()
    }

    #[test]
    fn test_from_dataframe() {
        let table = RecordTable::from_dataframe(&sample_df(), "Exited").unwrap();
        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.n_features(), 3);
        assert_eq!(table.feature_names(), &["CreditScore", "Balance", "IsActiveMember"]);
        assert_eq!(table.features()[[1, 1]], 1200.5);
        assert_eq!(table.features()[[1, 2]], 0.0);
        assert_eq!(table.labels().to_vec(), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_missing_label_column() {
        let err = RecordTable::from_dataframe(&sample_df(), "Churned").unwrap_err();
        assert!(matches!(err, KolosalError::FeatureNotFound(_)));
    }

    #[test]
    fn test_rejects_non_binary_labels() {
        let df = df!("a" => &[1.0, 2.0], "Exited" => &[0i64, 2]).unwrap();
        assert!(RecordTable::from_dataframe(&df, "Exited").is_err());
    }

    #[test]
    fn test_rejects_fractional_labels() {
        let df = df!("a" => &[1.0, 2.0, 3.0, 4.0], "Exited" => &[0.0, 0.6, 1.0, 1.9]).unwrap();
        let err = RecordTable::from_dataframe(&df, "Exited").unwrap_err();
        assert!(matches!(err, KolosalError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_string_labels() {
        let df = df!("a" => &[1.0, 2.0, 3.0], "Exited" => &["no", "yes", "no"]).unwrap();
        let err = RecordTable::from_dataframe(&df, "Exited").unwrap_err();
        assert!(matches!(err, KolosalError::DataError(_)));
    }

    #[test]
    fn test_accepts_float_and_bool_labels() {
        let df = df!("a" => &[1.0, 2.0], "Exited" => &[1.0, 0.0]).unwrap();
        let table = RecordTable::from_dataframe(&df, "Exited").unwrap();
        assert_eq!(table.labels().to_vec(), vec![1, 0]);

        let df = df!("a" => &[1.0, 2.0], "Exited" => &[false, true]).unwrap();
        let table = RecordTable::from_dataframe(&df, "Exited").unwrap();
        assert_eq!(table.labels().to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_rejects_string_features() {
        let df = df!("Geography" => &["France", "Spain"], "Exited" => &[0i64, 1]).unwrap();
        let err = RecordTable::from_dataframe(&df, "Exited").unwrap_err();
        assert!(matches!(err, KolosalError::DataError(_)));
    }

    #[test]
    fn test_select_rows_and_counts() {
        let table = RecordTable::from_dataframe(&sample_df(), "Exited").unwrap();
        let subset = table.select_rows(&[3, 1, 0]);
        assert_eq!(subset.n_rows(), 3);
        assert_eq!(subset.labels().to_vec(), vec![1, 1, 0]);
        assert_eq!(subset.class_counts().get(&1), Some(&2));
        assert!((table.positive_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_to_dataframe_roundtrip_schema() {
        let table = RecordTable::from_dataframe(&sample_df(), "Exited").unwrap();
        let df = table.to_dataframe(true).unwrap();
        assert_eq!(df.width(), 4);
        assert_eq!(df.height(), 4);
        let back = RecordTable::from_dataframe(&df, "Exited").unwrap();
        assert_eq!(back.features(), table.features());
    }
}
