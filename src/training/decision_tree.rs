//! Decision tree classifier
//!
//! Binary CART tree. Each node draws its own random subset of candidate
//! features when `max_features` is below the feature count, so a seeded tree
//! is reproducible and a forest of them decorrelates.

use crate::error::{KolosalError, Result};
use super::models::{check_fit_inputs, Classifier};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node holding the fraction of positive samples that reached it
    Leaf {
        proba: f64,
        n_samples: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

impl TreeNode {
    fn positive_proba(&self, sample: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { proba, .. } => return *proba,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if sample[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Gini impurity
    Gini,
    /// Shannon entropy
    Entropy,
}

impl Criterion {
    /// Impurity of a node holding `n_pos` positives out of `n`
    fn impurity(self, n_pos: usize, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let p = n_pos as f64 / n as f64;
        let q = 1.0 - p;
        match self {
            Criterion::Gini => 1.0 - p * p - q * q,
            Criterion::Entropy => {
                let h = |v: f64| if v > 0.0 { -v * v.log2() } else { 0.0 };
                h(p) + h(q)
            }
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Gini => write!(f, "gini"),
            Criterion::Entropy => write!(f, "entropy"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Decision tree classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Tree root
    root: Option<TreeNode>,
    /// Maximum depth (root is depth 0)
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features drawn per node
    pub max_features: Option<usize>,
    /// Impurity criterion
    pub criterion: Criterion,
    /// Seed for the per-node feature draws
    pub random_state: Option<u64>,
    /// Number of features
    n_features: usize,
    /// Feature importances
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    /// Create a new unfitted tree
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            random_state: None,
            n_features: 0,
            feature_importances: None,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    /// Set the number of features considered at each split
    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    /// Set criterion
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<i64>,
        indices: &[usize],
        depth: usize,
        rng: &mut ChaCha8Rng,
        importances: &mut [f64],
    ) -> TreeNode {
        let n_samples = indices.len();
        let n_pos = indices.iter().filter(|&&i| y[i] == 1).count();
        let proba = if n_samples == 0 { 0.0 } else { n_pos as f64 / n_samples as f64 };
        let impurity = self.criterion.impurity(n_pos, n_samples);

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || n_pos == 0
            || n_pos == n_samples;

        if should_stop {
            return TreeNode::Leaf { proba, n_samples };
        }

        let features = self.draw_features(rng);
        let best = match self.find_best_split(x, y, indices, &features, impurity) {
            Some(best) => best,
            None => return TreeNode::Leaf { proba, n_samples },
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature]] <= best.threshold);

        importances[best.feature] += n_samples as f64 * best.gain;

        let left = Box::new(self.build_tree(x, y, &left_indices, depth + 1, rng, importances));
        let right = Box::new(self.build_tree(x, y, &right_indices, depth + 1, rng, importances));

        TreeNode::Split {
            feature_idx: best.feature,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    /// Candidate features for one node, ascending
    fn draw_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let k = self.max_features.unwrap_or(self.n_features).min(self.n_features);
        if k >= self.n_features {
            return (0..self.n_features).collect();
        }
        let mut features = rand::seq::index::sample(rng, self.n_features, k).into_vec();
        features.sort_unstable();
        features
    }

    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<i64>,
        indices: &[usize],
        features: &[usize],
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        // Collected in feature order so ties resolve to the lowest feature
        let per_feature: Vec<Option<SplitCandidate>> = features
            .par_iter()
            .map(|&feature| self.best_split_for_feature(x, y, indices, feature, parent_impurity))
            .collect();

        per_feature.into_iter().flatten().fold(None, |best, cand| match best {
            Some(b) if b.gain >= cand.gain => Some(b),
            _ => Some(cand),
        })
    }

    /// Single sorted sweep with incremental positive counts
    fn best_split_for_feature(
        &self,
        x: &Array2<f64>,
        y: &Array1<i64>,
        indices: &[usize],
        feature: usize,
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, bool)> = indices
            .iter()
            .map(|&i| (x[[i, feature]], y[i] == 1))
            .collect();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        let total_pos = sorted.iter().filter(|(_, pos)| *pos).count();
        let min_leaf = self.min_samples_leaf;

        let mut left_pos = 0usize;
        let mut best: Option<SplitCandidate> = None;

        for i in 0..n - 1 {
            if sorted[i].1 {
                left_pos += 1;
            }
            let left_n = i + 1;
            let right_n = n - left_n;

            if sorted[i].0 == sorted[i + 1].0 {
                continue;
            }
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let weighted = (left_n as f64 * self.criterion.impurity(left_pos, left_n)
                + right_n as f64 * self.criterion.impurity(total_pos - left_pos, right_n))
                / n as f64;
            let gain = parent_impurity - weighted;

            if gain > best.map_or(1e-12, |b| b.gain) {
                let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(SplitCandidate { feature, threshold, gain });
            }
        }

        best
    }

    fn root(&self) -> Result<&TreeNode> {
        self.root.as_ref().ok_or(KolosalError::ModelNotFitted)
    }

    /// Probability of the positive class for one row
    pub(crate) fn positive_proba_row(&self, sample: ArrayView1<f64>) -> Result<f64> {
        Ok(self.root()?.positive_proba(sample))
    }

    /// Get tree depth (a lone leaf has depth 0)
    pub fn get_depth(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::depth)
    }

    /// Get number of leaves
    pub fn get_n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::n_leaves)
    }
}

impl Classifier for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        check_fit_inputs(x, y)?;

        if x.nrows() < self.min_samples_split {
            return Err(KolosalError::ValidationError(format!(
                "Need at least {} samples, got {}",
                self.min_samples_split,
                x.nrows()
            )));
        }

        self.n_features = x.ncols();
        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut importances = vec![0.0; self.n_features];
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.root = Some(self.build_tree(x, y, &indices, 0, &mut rng, &mut importances));

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let root = self.root()?;
        if x.ncols() != self.n_features {
            return Err(KolosalError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, row) in x.rows().into_iter().enumerate() {
            let p = root.positive_proba(row);
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }
        Ok(proba)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.feature_importances.clone()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn is_fitted(&self) -> bool {
        self.root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_separable_data() {
        let x = array![[1.0, 5.0], [2.0, 3.0], [3.0, 4.0], [6.0, 1.0], [7.0, 2.0], [8.0, 0.0]];
        let y = array![0i64, 0, 0, 1, 1, 1];

        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();

        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.get_n_leaves(), 2);
    }

    #[test]
    fn test_max_depth() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 3)) % 11) as f64);
        let y = Array1::from_shape_fn(40, |i| (i % 3 == 0) as i64);

        let mut tree = DecisionTree::new().with_max_depth(2);
        tree.fit(&x, &y).unwrap();

        assert!(tree.get_depth() <= 2);
    }

    #[test]
    fn test_min_samples_leaf() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(20, |i| (i == 0) as i64);

        let mut tree = DecisionTree::new().with_min_samples_leaf(5);
        tree.fit(&x, &y).unwrap();

        // The lone positive cannot be isolated into a leaf of one
        let proba = tree.predict_proba(&x).unwrap();
        assert!(proba[[0, 1]] <= 0.2 + 1e-12);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![0i64, 0, 1, 1];

        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();

        let importances = tree.feature_importances().unwrap();
        assert!((importances[0] - 1.0).abs() < 1e-12);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_seeded_feature_draws_are_reproducible() {
        let x = Array2::from_shape_fn((60, 5), |(i, j)| ((i * 7 + j * 13) % 17) as f64);
        let y = Array1::from_shape_fn(60, |i| ((i * 7) % 17 > 8) as i64);

        let mut a = DecisionTree::new().with_max_features(2).with_random_state(5);
        let mut b = DecisionTree::new().with_max_features(2).with_random_state(5);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_entropy_criterion() {
        assert!((Criterion::Entropy.impurity(5, 10) - 1.0).abs() < 1e-12);
        assert!((Criterion::Gini.impurity(5, 10) - 0.5).abs() < 1e-12);
        assert_eq!(Criterion::Gini.impurity(10, 10), 0.0);
    }

    #[test]
    fn test_unfitted() {
        let tree = DecisionTree::new();
        assert!(matches!(
            tree.predict(&Array2::zeros((1, 2))),
            Err(KolosalError::ModelNotFitted)
        ));
    }
}
