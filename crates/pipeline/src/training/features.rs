//! Numeric feature matrix extraction and the deterministic train/validation
//! split.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mlpromote_core::dataset::DatasetHandle;

use crate::error::TrainingError;

/// Dense row-major features plus regression targets.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

/// Per-feature standardisation parameters, fitted on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl FeatureMatrix {
    /// Build the matrix from a processed dataset.
    ///
    /// Feature columns are the schema's fields minus the target and the
    /// excluded fields. Numbers are used as-is, booleans become 0/1 and
    /// nulls become 0. Anything else is rejected.
    pub fn from_dataset(
        dataset: &DatasetHandle,
        target_column: &str,
        exclude_fields: &[String],
    ) -> Result<Self, TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        if !dataset.schema.fields.iter().any(|f| f == target_column) {
            return Err(TrainingError::InvalidInput(format!(
                "target column '{target_column}' is not in the dataset"
            )));
        }

        let feature_names: Vec<String> = dataset
            .schema
            .fields
            .iter()
            .filter(|f| *f != target_column && !exclude_fields.contains(f))
            .cloned()
            .collect();
        if feature_names.is_empty() {
            return Err(TrainingError::InvalidInput(
                "no feature columns remain after exclusions".into(),
            ));
        }

        let mut rows: Vec<Vec<f64>> = Vec::new();
        rows.try_reserve_exact(dataset.len()).map_err(|e| {
            TrainingError::Resource(format!("cannot allocate {} rows: {e}", dataset.len()))
        })?;
        let mut targets = Vec::with_capacity(dataset.len());

        for (idx, record) in dataset.records.iter().enumerate() {
            let target = match record.get(target_column).and_then(Value::as_f64) {
                Some(t) => t,
                None => {
                    return Err(TrainingError::InvalidInput(format!(
                        "row {idx}: target '{target_column}' is missing or not numeric"
                    )))
                }
            };

            let mut row = Vec::with_capacity(feature_names.len());
            for name in &feature_names {
                let value = match record.get(name) {
                    None | Some(Value::Null) => 0.0,
                    Some(Value::Bool(b)) => f64::from(u8::from(*b)),
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                    Some(other) => {
                        return Err(TrainingError::InvalidInput(format!(
                            "row {idx}: feature '{name}' is not numeric ({other})"
                        )))
                    }
                };
                row.push(value);
            }
            rows.push(row);
            targets.push(target);
        }

        Ok(Self {
            feature_names,
            rows,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    /// Shuffle with `seed` and split into (train, validation).
    ///
    /// The training split always keeps at least one row. A `train_split`
    /// of 1.0 leaves the validation split empty.
    pub fn split(self, train_split: f64, seed: u64) -> (FeatureMatrix, FeatureMatrix) {
        let n = self.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let train_n = ((n as f64 * train_split).round() as usize).clamp(1, n);
        let pick = |indices: &[usize]| FeatureMatrix {
            feature_names: self.feature_names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        };
        (pick(&order[..train_n]), pick(&order[train_n..]))
    }

    /// Fit standardisation parameters on this matrix.
    pub fn fit_scaler(&self) -> Scaler {
        let width = self.width();
        let n = self.len().max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in &self.rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; width];
        for row in &self.rows {
            for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        let std = std
            .into_iter()
            .map(|var| if var > f64::EPSILON { var.sqrt() } else { 1.0 })
            .collect();
        Scaler { mean, std }
    }

    pub fn standardize(&mut self, scaler: &Scaler) {
        for row in &mut self.rows {
            for ((v, m), s) in row.iter_mut().zip(&scaler.mean).zip(&scaler.std) {
                *v = (*v - m) / s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mlpromote_core::dataset::DatasetLocation;
    use serde_json::json;

    fn dataset(rows: Vec<Value>) -> DatasetHandle {
        let records = rows
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        DatasetHandle::raw(DatasetLocation::new("b", "k"), records)
    }

    #[test]
    fn extracts_features_in_schema_order() {
        let ds = dataset(vec![
            json!({ "f1": 1.0, "timestamp": "t", "flag": true, "target_column": 2.0 }),
            json!({ "f1": null, "timestamp": "t", "flag": false, "target_column": 3.0 }),
        ]);
        let m = FeatureMatrix::from_dataset(&ds, "target_column", &["timestamp".into()]).unwrap();

        assert_eq!(m.feature_names, vec!["f1", "flag"]);
        assert_eq!(m.rows, vec![vec![1.0, 1.0], vec![0.0, 0.0]]);
        assert_eq!(m.targets, vec![2.0, 3.0]);
    }

    #[test]
    fn string_feature_is_invalid_input() {
        let ds = dataset(vec![json!({ "f1": "abc", "target_column": 1.0 })]);
        assert_matches!(
            FeatureMatrix::from_dataset(&ds, "target_column", &[]),
            Err(TrainingError::InvalidInput(_))
        );
    }

    #[test]
    fn empty_dataset_is_rejected() {
        assert_matches!(
            FeatureMatrix::from_dataset(&dataset(vec![]), "target_column", &[]),
            Err(TrainingError::EmptyDataset)
        );
    }

    #[test]
    fn missing_target_column_is_invalid_input() {
        let ds = dataset(vec![json!({ "f1": 1.0 })]);
        assert_matches!(
            FeatureMatrix::from_dataset(&ds, "target_column", &[]),
            Err(TrainingError::InvalidInput(_))
        );
    }

    #[test]
    fn split_is_deterministic_per_seed() {
        let rows: Vec<Value> = (0..20)
            .map(|i| json!({ "f1": i as f64, "target_column": i as f64 }))
            .collect();
        let m = FeatureMatrix::from_dataset(&dataset(rows), "target_column", &[]).unwrap();

        let (a_train, a_val) = m.clone().split(0.8, 42);
        let (b_train, b_val) = m.clone().split(0.8, 42);
        assert_eq!(a_train, b_train);
        assert_eq!(a_val, b_val);
        assert_eq!(a_train.len(), 16);
        assert_eq!(a_val.len(), 4);

        let (c_train, _) = m.split(0.8, 7);
        assert_ne!(a_train.targets, c_train.targets);
    }

    #[test]
    fn full_split_leaves_validation_empty() {
        let ds = dataset(vec![json!({ "f1": 1.0, "target_column": 1.0 })]);
        let m = FeatureMatrix::from_dataset(&ds, "target_column", &[]).unwrap();
        let (train, val) = m.split(1.0, 42);
        assert_eq!(train.len(), 1);
        assert!(val.is_empty());
    }

    #[test]
    fn standardize_centres_features() {
        let ds = dataset(vec![
            json!({ "f1": 1.0, "f2": 5.0, "target_column": 0.0 }),
            json!({ "f1": 3.0, "f2": 5.0, "target_column": 0.0 }),
        ]);
        let mut m = FeatureMatrix::from_dataset(&ds, "target_column", &[]).unwrap();
        let scaler = m.fit_scaler();
        m.standardize(&scaler);

        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(m.rows, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }
}
