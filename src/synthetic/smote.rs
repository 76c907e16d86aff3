//! SMOTE

use crate::error::{KolosalError, Result};
use crate::synthetic::{class_counts, class_indices, ResampleResult, Sampler};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use tracing::debug;

/// Distance/index pair for BinaryHeap-based partial sort. Ties break on index
/// so neighbour lists are stable.
#[derive(Debug, Clone, Copy)]
struct DistIdx(f64, usize);

impl PartialEq for DistIdx {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for DistIdx {}
impl PartialOrd for DistIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(Ordering::Equal)
            .then(self.1.cmp(&other.1))
    }
}

/// SMOTE (Synthetic Minority Over-sampling Technique)
///
/// Each synthetic row is `x_i + gap * (x_nn - x_i)` where `x_i` is a random
/// row of the class, `x_nn` one of its `k` nearest same-class neighbours and
/// `gap` uniform in `[0, 1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SMOTE {
    /// Number of nearest neighbors
    k_neighbors: usize,
    /// Target ratio of each minority class to the majority class
    sampling_strategy: f64,
    /// Random seed
    seed: Option<u64>,
    /// Target samples per class
    target_counts: Option<BTreeMap<i64, usize>>,
}

impl SMOTE {
    /// Create new SMOTE sampler that balances every class to the majority
    pub fn new() -> Self {
        Self {
            k_neighbors: 5,
            sampling_strategy: 1.0,
            seed: None,
            target_counts: None,
        }
    }

    /// Set number of neighbors
    pub fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k.max(1);
        self
    }

    /// Set sampling strategy (minority / majority ratio after resampling)
    pub fn with_sampling_strategy(mut self, ratio: f64) -> Self {
        self.sampling_strategy = ratio.clamp(0.1, 1.0);
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn k_neighbors(&self) -> usize {
        self.k_neighbors
    }

    /// Target counts computed by `fit`
    pub fn target_counts(&self) -> Option<&BTreeMap<i64, usize>> {
        self.target_counts.as_ref()
    }

    fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(ai, bi)| (ai - bi).powi(2)).sum()
    }

    /// k nearest rows of `samples` to row `point_idx`, excluding the row itself,
    /// nearest first.
    fn find_neighbors(samples: &Array2<f64>, point_idx: usize, k: usize) -> Vec<usize> {
        let point = samples.row(point_idx);
        let mut heap: BinaryHeap<DistIdx> = BinaryHeap::with_capacity(k + 1);

        for (i, row) in samples.rows().into_iter().enumerate() {
            if i == point_idx {
                continue;
            }
            let candidate = DistIdx(Self::squared_distance(point, row), i);
            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        heap.into_sorted_vec().into_iter().map(|DistIdx(_, i)| i).collect()
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

impl Default for SMOTE {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SMOTE {
    fn fit(&mut self, _x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        let counts = class_counts(y);

        if counts.len() < 2 {
            return Err(KolosalError::ValidationError(
                "Need at least 2 classes for SMOTE".to_string(),
            ));
        }

        let max_count = counts.values().copied().max().unwrap_or(0);

        let targets = counts
            .iter()
            .map(|(&class, &count)| {
                let target = (max_count as f64 * self.sampling_strategy) as usize;
                (class, target.max(count))
            })
            .collect();

        self.target_counts = Some(targets);
        Ok(())
    }

    fn resample(&self, x: &Array2<f64>, y: &Array1<i64>) -> Result<ResampleResult> {
        let targets = self
            .target_counts
            .as_ref()
            .ok_or_else(|| KolosalError::ValidationError("SMOTE not fitted".to_string()))?;

        if x.nrows() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }

        let mut rng = self.rng();
        let indices = class_indices(y);
        let n_features = x.ncols();

        let mut synthetic_rows: Vec<f64> = Vec::new();
        let mut synthetic_y: Vec<i64> = Vec::new();
        let mut n_synthetic = BTreeMap::new();

        for (&class, &target_count) in targets {
            let class_idx = indices.get(&class).map(Vec::as_slice).unwrap_or(&[]);
            let n_to_generate = target_count.saturating_sub(class_idx.len());
            n_synthetic.insert(class, n_to_generate);

            if n_to_generate == 0 {
                continue;
            }

            if class_idx.len() < 2 {
                return Err(KolosalError::ValidationError(format!(
                    "class {} has {} sample(s); SMOTE needs at least 2",
                    class,
                    class_idx.len()
                )));
            }

            let class_samples = x.select(ndarray::Axis(0), class_idx);
            let k = self.k_neighbors.min(class_idx.len() - 1);

            let neighbors: Vec<Vec<usize>> = (0..class_samples.nrows())
                .into_par_iter()
                .map(|i| Self::find_neighbors(&class_samples, i, k))
                .collect();

            debug!(class, n_samples = class_idx.len(), k, n_to_generate, "generating synthetic rows");

            synthetic_rows.reserve(n_to_generate * n_features);
            for _ in 0..n_to_generate {
                let i = rng.gen_range(0..class_samples.nrows());
                let nn = neighbors[i][rng.gen_range(0..neighbors[i].len())];
                let gap: f64 = rng.gen();

                let base = class_samples.row(i);
                let neighbor = class_samples.row(nn);
                synthetic_rows.extend(
                    base.iter()
                        .zip(neighbor.iter())
                        .map(|(&p, &n)| p + gap * (n - p)),
                );
                synthetic_y.push(class);
            }
        }

        let n_original = x.nrows();
        let synthetic = Array2::from_shape_vec((synthetic_y.len(), n_features), synthetic_rows)?;
        let result_x = ndarray::concatenate(ndarray::Axis(0), &[x.view(), synthetic.view()])?;

        let mut all_y: Vec<i64> = Vec::with_capacity(n_original + synthetic_y.len());
        all_y.extend(y.iter().copied());
        all_y.extend_from_slice(&synthetic_y);

        Ok(ResampleResult {
            x: result_x,
            y: Array1::from_vec(all_y),
            n_synthetic,
        })
    }
}
