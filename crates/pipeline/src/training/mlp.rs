//! One-hidden-layer MLP regressor trained with mini-batch SGD.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{FeatureMatrix, Trainable};
use crate::error::TrainingError;

/// Serialized weights of an [`MlpRegressor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpWeights {
    /// `hidden x inputs`, row-major.
    pub w1: Vec<Vec<f64>>,
    pub b1: Vec<f64>,
    pub w2: Vec<f64>,
    pub b2: f64,
}

pub struct MlpRegressor {
    weights: MlpWeights,
    learning_rate: f64,
    batch_size: usize,
    rng: StdRng,
}

impl MlpRegressor {
    /// He-style uniform initialisation seeded by `seed`.
    pub fn new(inputs: usize, hidden: usize, learning_rate: f64, batch_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let limit1 = (6.0 / inputs.max(1) as f64).sqrt();
        let limit2 = (6.0 / hidden.max(1) as f64).sqrt();

        let w1 = (0..hidden)
            .map(|_| (0..inputs).map(|_| rng.random_range(-limit1..limit1)).collect())
            .collect();
        let w2 = (0..hidden).map(|_| rng.random_range(-limit2..limit2) * 0.1).collect();

        Self {
            weights: MlpWeights {
                w1,
                b1: vec![0.0; hidden],
                w2,
                b2: 0.0,
            },
            learning_rate,
            batch_size: batch_size.max(1),
            rng,
        }
    }

    pub fn weights(&self) -> &MlpWeights {
        &self.weights
    }

    /// Hidden activations and output for one row.
    fn forward(&self, x: &[f64]) -> (Vec<f64>, f64) {
        let w = &self.weights;
        let hidden: Vec<f64> = w
            .w1
            .iter()
            .zip(&w.b1)
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>() + b;
                z.max(0.0)
            })
            .collect();
        let y = hidden.iter().zip(&w.w2).map(|(h, wo)| h * wo).sum::<f64>() + w.b2;
        (hidden, y)
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.forward(x).1
    }

    /// One SGD step over `batch` (indices into `data`). Returns the batch's
    /// summed squared error.
    fn step(&mut self, data: &FeatureMatrix, batch: &[usize]) -> f64 {
        let hidden_n = self.weights.b1.len();
        let inputs = data.width();
        let mut g_w1 = vec![vec![0.0; inputs]; hidden_n];
        let mut g_b1 = vec![0.0; hidden_n];
        let mut g_w2 = vec![0.0; hidden_n];
        let mut g_b2 = 0.0;
        let mut sse = 0.0;

        for &i in batch {
            let x = &data.rows[i];
            let (hidden, y) = self.forward(x);
            let err = y - data.targets[i];
            sse += err * err;

            let d_out = 2.0 * err;
            g_b2 += d_out;
            for j in 0..hidden_n {
                g_w2[j] += d_out * hidden[j];
                if hidden[j] > 0.0 {
                    let d_hidden = d_out * self.weights.w2[j];
                    g_b1[j] += d_hidden;
                    for (g, xi) in g_w1[j].iter_mut().zip(x) {
                        *g += d_hidden * xi;
                    }
                }
            }
        }

        let scale = self.learning_rate / batch.len() as f64;
        let w = &mut self.weights;
        w.b2 -= scale * g_b2;
        for j in 0..hidden_n {
            w.w2[j] -= scale * g_w2[j];
            w.b1[j] -= scale * g_b1[j];
            for (wij, g) in w.w1[j].iter_mut().zip(&g_w1[j]) {
                *wij -= scale * g;
            }
        }
        sse
    }
}

impl Trainable for MlpRegressor {
    fn fit_epoch(&mut self, train: &FeatureMatrix, epoch: u32) -> Result<f64, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(&mut self.rng);

        let mut sse = 0.0;
        for batch in order.chunks(self.batch_size) {
            sse += self.step(train, batch);
        }
        let loss = sse / train.len() as f64;
        if !loss.is_finite() {
            return Err(TrainingError::Numerical { epoch });
        }
        Ok(loss)
    }

    fn evaluate(&self, data: &FeatureMatrix) -> Option<f64> {
        if data.is_empty() {
            return None;
        }
        let sse: f64 = data
            .rows
            .iter()
            .zip(&data.targets)
            .map(|(x, t)| (self.predict(x) - t).powi(2))
            .sum();
        Some(sse / data.len() as f64)
    }

    fn export(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "mlp_regressor",
            "activation": "relu",
            "weights": self.weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64 / n as f64 - 0.5]).collect();
        let targets = rows.iter().map(|r| 2.0 * r[0] + 1.0).collect();
        FeatureMatrix {
            feature_names: vec!["x".into()],
            rows,
            targets,
        }
    }

    #[test]
    fn loss_decreases_on_linear_target() {
        let data = linear_data(64);
        let mut model = MlpRegressor::new(1, 8, 0.05, 8, 42);

        let first = model.fit_epoch(&data, 1).unwrap();
        let mut last = first;
        for epoch in 2..=60 {
            last = model.fit_epoch(&data, epoch).unwrap();
        }
        assert!(last < first, "loss did not improve: {first} -> {last}");
        assert!(model.evaluate(&data).unwrap() < first);
    }

    #[test]
    fn same_seed_same_weights() {
        let data = linear_data(16);
        let mut a = MlpRegressor::new(1, 4, 0.01, 4, 7);
        let mut b = MlpRegressor::new(1, 4, 0.01, 4, 7);
        a.fit_epoch(&data, 1).unwrap();
        b.fit_epoch(&data, 1).unwrap();
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn divergence_is_numerical_error() {
        let mut data = linear_data(16);
        for t in &mut data.targets {
            *t *= 1e200;
        }
        let mut model = MlpRegressor::new(1, 4, 1e10, 4, 1);

        let result = (1..=5).try_for_each(|e| model.fit_epoch(&data, e).map(|_| ()));
        assert!(matches!(result, Err(TrainingError::Numerical { .. })));
    }

    #[test]
    fn evaluate_empty_is_none() {
        let model = MlpRegressor::new(1, 4, 0.01, 4, 7);
        let empty = FeatureMatrix {
            feature_names: vec!["x".into()],
            rows: vec![],
            targets: vec![],
        };
        assert_eq!(model.evaluate(&empty), None);
    }
}
