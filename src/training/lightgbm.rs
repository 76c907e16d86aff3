//! LightGBM-style gradient boosting with leaf-wise tree growth
//!
//! Binary log-loss objective only. Differences from level-wise boosting:
//! - Leaf-wise (best-first) growth bounded by `num_leaves` and `max_depth`
//! - Optional Gradient-based One-Side Sampling (GOSS)
//! - Leaf outputs clamped by `max_delta_step` when it is positive

use crate::error::{KolosalError, Result};
use super::models::{check_fit_inputs, Classifier};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Row sampling strategy per boosting round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostingType {
    /// Plain gradient boosting, optionally bagged via `subsample`
    Gbdt,
    /// Gradient-based One-Side Sampling
    Goss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightGBMConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    #[serde(alias = "max_leaves")]
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_child_samples: usize,
    /// Minimum hessian sum in a leaf
    pub min_child_weight: f64,
    /// Leaf output bound, disabled when `<= 0`
    pub max_delta_step: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub boosting_type: BoostingType,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub top_rate: f64,
    pub other_rate: f64,
    pub random_state: Option<u64>,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: None,
            min_child_samples: 20,
            min_child_weight: 1e-3,
            max_delta_step: 0.0,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            boosting_type: BoostingType::Gbdt,
            subsample: 1.0,
            colsample_bytree: 1.0,
            top_rate: 0.2,
            other_rate: 0.1,
            random_state: Some(42),
        }
    }
}

impl LightGBMConfig {
    /// Reject configurations the booster cannot train with
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, value: String, reason: &str| KolosalError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };

        if self.n_estimators == 0 {
            return Err(invalid("n_estimators", "0".into(), "must be positive"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("learning_rate", self.learning_rate.to_string(), "must be positive"));
        }
        if self.num_leaves < 2 {
            return Err(invalid("num_leaves", self.num_leaves.to_string(), "must be at least 2"));
        }
        if let Some(0) = self.max_depth {
            return Err(invalid("max_depth", "0".into(), "must be positive"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(invalid("subsample", self.subsample.to_string(), "must be in (0, 1]"));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(invalid(
                "colsample_bytree",
                self.colsample_bytree.to_string(),
                "must be in (0, 1]",
            ));
        }
        if self.boosting_type == BoostingType::Goss
            && !(self.top_rate > 0.0 && self.other_rate > 0.0 && self.top_rate + self.other_rate <= 1.0)
        {
            return Err(invalid(
                "top_rate + other_rate",
                format!("{} + {}", self.top_rate, self.other_rate),
                "GOSS rates must be positive and sum to at most 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LGBNode {
    Leaf { value: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<LGBNode>,
        right: Box<LGBNode>,
    },
}

impl LGBNode {
    fn predict(&self, sample: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                LGBNode::Leaf { value } => return *value,
                LGBNode::Split { feature, threshold, left, right } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

// ---- Tree building utilities ----

fn compute_leaf_weight(g: f64, h: f64, config: &LightGBMConfig) -> f64 {
    let alpha = config.reg_alpha;
    let g_adj = if g.abs() <= alpha { 0.0 } else { g - alpha * g.signum() };
    let w = -g_adj / (h + config.reg_lambda);
    if config.max_delta_step > 0.0 {
        w.clamp(-config.max_delta_step, config.max_delta_step)
    } else {
        w
    }
}

fn compute_gain_single(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

fn make_leaf(gradients: &[f64], hessians: &[f64], indices: &[usize], config: &LightGBMConfig) -> LGBNode {
    let g: f64 = indices.iter().map(|&i| gradients[i]).sum();
    let h: f64 = indices.iter().map(|&i| hessians[i]).sum();
    LGBNode::Leaf { value: compute_leaf_weight(g, h, config) }
}

struct FeatureSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left_indices: Vec<usize>,
    right_indices: Vec<usize>,
}

fn find_best_split_for_feature(
    x: &Array2<f64>,
    gradients: &[f64],
    hessians: &[f64],
    indices: &[usize],
    feature: usize,
    config: &LightGBMConfig,
) -> Option<FeatureSplit> {
    let mut sorted: Vec<(usize, f64)> = indices.iter().map(|&i| (i, x[[i, feature]])).collect();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let total_g: f64 = indices.iter().map(|&i| gradients[i]).sum();
    let total_h: f64 = indices.iter().map(|&i| hessians[i]).sum();
    let base_score = compute_gain_single(total_g, total_h, config.reg_lambda);

    let mut left_g = 0.0;
    let mut left_h = 0.0;
    let mut best_gain = 0.0;
    let mut best: Option<(f64, usize)> = None;

    for i in 0..sorted.len() - 1 {
        left_g += gradients[sorted[i].0];
        left_h += hessians[sorted[i].0];
        let right_g = total_g - left_g;
        let right_h = total_h - left_h;

        if i + 1 < config.min_child_samples || sorted.len() - i - 1 < config.min_child_samples {
            continue;
        }
        if left_h < config.min_child_weight || right_h < config.min_child_weight {
            continue;
        }
        if sorted[i].1 == sorted[i + 1].1 {
            continue;
        }

        let gain = compute_gain_single(left_g, left_h, config.reg_lambda)
            + compute_gain_single(right_g, right_h, config.reg_lambda)
            - base_score;

        if gain > best_gain {
            best_gain = gain;
            best = Some(((sorted[i].1 + sorted[i + 1].1) / 2.0, i + 1));
        }
    }

    let (threshold, pos) = best?;
    Some(FeatureSplit {
        feature,
        threshold,
        gain: best_gain,
        left_indices: sorted[..pos].iter().map(|&(i, _)| i).collect(),
        right_indices: sorted[pos..].iter().map(|&(i, _)| i).collect(),
    })
}

fn find_best_split(
    x: &Array2<f64>,
    gradients: &[f64],
    hessians: &[f64],
    indices: &[usize],
    features: &[usize],
    config: &LightGBMConfig,
) -> Option<FeatureSplit> {
    if indices.len() < config.min_child_samples * 2 || indices.len() < 2 {
        return None;
    }
    let candidates: Vec<FeatureSplit> = features
        .par_iter()
        .filter_map(|&feat| find_best_split_for_feature(x, gradients, hessians, indices, feat, config))
        .collect();

    // First maximum in feature order
    candidates.into_iter().fold(None, |best: Option<FeatureSplit>, cand| match best {
        Some(b) if b.gain >= cand.gain => Some(b),
        _ => Some(cand),
    })
}

struct PendingSplit {
    node_id: usize,
    split: FeatureSplit,
}

impl PartialEq for PendingSplit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for PendingSplit {}
impl PartialOrd for PendingSplit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingSplit {
    // Highest gain first; earlier nodes win ties
    fn cmp(&self, other: &Self) -> Ordering {
        self.split
            .gain
            .partial_cmp(&other.split.gain)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

enum NodeSlot {
    Leaf(Vec<usize>),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Build tree using leaf-wise (best-first) strategy
fn build_lgb_tree(
    x: &Array2<f64>,
    gradients: &[f64],
    hessians: &[f64],
    indices: &[usize],
    config: &LightGBMConfig,
    rng: &mut Xoshiro256PlusPlus,
    split_counts: &mut [f64],
) -> LGBNode {
    let n_features = x.ncols();
    let n_selected = ((n_features as f64 * config.colsample_bytree).ceil() as usize).clamp(1, n_features);
    let mut feature_indices: Vec<usize> = (0..n_features).collect();
    if n_selected < n_features {
        feature_indices.shuffle(rng);
        feature_indices.truncate(n_selected);
        feature_indices.sort_unstable();
    }

    let mut nodes: Vec<NodeSlot> = vec![NodeSlot::Leaf(indices.to_vec())];
    let mut depths: Vec<usize> = vec![0];
    let mut heap: BinaryHeap<PendingSplit> = BinaryHeap::new();
    let max_depth_limit = config.max_depth.unwrap_or(usize::MAX);

    if max_depth_limit > 0 {
        if let Some(split) = find_best_split(x, gradients, hessians, indices, &feature_indices, config) {
            heap.push(PendingSplit { node_id: 0, split });
        }
    }

    let mut n_leaves = 1usize;

    while n_leaves < config.num_leaves {
        let PendingSplit { node_id, split } = match heap.pop() {
            Some(s) => s,
            None => break,
        };

        let depth = depths[node_id];
        let left_id = nodes.len();
        let right_id = left_id + 1;
        split_counts[split.feature] += 1.0;

        nodes[node_id] = NodeSlot::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        n_leaves += 1;

        if depth + 1 < max_depth_limit {
            for (child_id, child_indices) in [(left_id, &split.left_indices), (right_id, &split.right_indices)] {
                if let Some(child) =
                    find_best_split(x, gradients, hessians, child_indices, &feature_indices, config)
                {
                    heap.push(PendingSplit { node_id: child_id, split: child });
                }
            }
        }

        nodes.push(NodeSlot::Leaf(split.left_indices));
        nodes.push(NodeSlot::Leaf(split.right_indices));
        depths.push(depth + 1);
        depths.push(depth + 1);
    }

    fn to_node(nodes: &[NodeSlot], idx: usize, g: &[f64], h: &[f64], config: &LightGBMConfig) -> LGBNode {
        match &nodes[idx] {
            NodeSlot::Leaf(indices) => make_leaf(g, h, indices, config),
            NodeSlot::Split { feature, threshold, left, right } => LGBNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(to_node(nodes, *left, g, h, config)),
                right: Box::new(to_node(nodes, *right, g, h, config)),
            },
        }
    }
    to_node(&nodes, 0, gradients, hessians, config)
}

/// Keep the `top_rate` largest gradients, sample `other_rate` of the rest and
/// up-weight the sampled rows by `(1 - top_rate) / other_rate`.
fn goss_sample(
    gradients: &mut [f64],
    hessians: &mut [f64],
    top_rate: f64,
    other_rate: f64,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<usize> {
    let n = gradients.len();
    let n_top = ((n as f64 * top_rate).ceil() as usize).min(n);
    let n_other = (n as f64 * other_rate).ceil() as usize;

    let mut sorted: Vec<usize> = (0..n).collect();
    sorted.sort_by(|&a, &b| {
        gradients[b].abs().partial_cmp(&gradients[a].abs()).unwrap_or(Ordering::Equal)
    });

    let mut selected: Vec<usize> = sorted[..n_top].to_vec();
    let mut remaining: Vec<usize> = sorted[n_top..].to_vec();
    remaining.shuffle(rng);
    remaining.truncate(n_other);

    let amplify = (1.0 - top_rate) / other_rate;
    for &i in &remaining {
        gradients[i] *= amplify;
        hessians[i] *= amplify;
    }
    selected.extend(remaining);
    selected.sort_unstable();
    selected
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// ============ LightGBM Classifier ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMClassifier {
    pub config: LightGBMConfig,
    trees: Vec<LGBNode>,
    base_prediction: f64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl LightGBMClassifier {
    pub fn new(config: LightGBMConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_prediction: 0.0,
            n_features: 0,
            feature_importances: None,
        }
    }

    /// Number of boosting rounds fitted
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw log-odds scores
    pub fn predict_raw(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(KolosalError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(KolosalError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let lr = self.config.learning_rate;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                self.base_prediction + self.trees.iter().map(|t| lr * t.predict(row)).sum::<f64>()
            })
            .collect())
    }
}

impl Classifier for LightGBMClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        self.config.validate()?;
        check_fit_inputs(x, y)?;

        let n = x.nrows();
        self.n_features = x.ncols();
        self.trees.clear();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state.unwrap_or(42));
        let pos_rate = (y.iter().filter(|&&v| v == 1).count() as f64 / n as f64).clamp(1e-15, 1.0 - 1e-15);
        self.base_prediction = (pos_rate / (1.0 - pos_rate)).ln();
        let mut raw = Array1::from_elem(n, self.base_prediction);
        let mut split_counts = vec![0.0; self.n_features];

        debug!(
            n_estimators = self.config.n_estimators,
            n_samples = n,
            base_score = self.base_prediction,
            "fitting lightgbm classifier"
        );

        for _ in 0..self.config.n_estimators {
            let probs: Vec<f64> = raw.iter().map(|&r| sigmoid(r)).collect();
            let mut gradients: Vec<f64> = probs
                .iter()
                .zip(y.iter())
                .map(|(&p, &yi)| p - yi as f64)
                .collect();
            let mut hessians: Vec<f64> = probs.iter().map(|&p| (p * (1.0 - p)).max(1e-16)).collect();

            let indices = match self.config.boosting_type {
                BoostingType::Goss => goss_sample(
                    &mut gradients,
                    &mut hessians,
                    self.config.top_rate,
                    self.config.other_rate,
                    &mut rng,
                ),
                BoostingType::Gbdt if self.config.subsample < 1.0 => {
                    let k = ((n as f64 * self.config.subsample).ceil() as usize).max(1);
                    let mut idx = rand::seq::index::sample(&mut rng, n, k).into_vec();
                    idx.sort_unstable();
                    idx
                }
                BoostingType::Gbdt => (0..n).collect(),
            };

            let tree = build_lgb_tree(
                x,
                &gradients,
                &hessians,
                &indices,
                &self.config,
                &mut rng,
                &mut split_counts,
            );
            for (r, row) in raw.iter_mut().zip(x.rows()) {
                *r += self.config.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        self.feature_importances = Some(Array1::from_vec(split_counts));
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let raw = self.predict_raw(x)?;
        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, &r) in raw.iter().enumerate() {
            let p = sigmoid(r);
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }
        Ok(proba)
    }

    /// Split counts per feature
    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.feature_importances.clone()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_classification_data() -> (Array2<f64>, Array1<i64>) {
        let x = Array2::from_shape_vec((100, 2), (0..200).map(|i| (i as f64) / 100.0).collect()).unwrap();
        let y = Array1::from_vec((0..100).map(|i| if i < 50 { 0 } else { 1 }).collect());
        (x, y)
    }

    #[test]
    fn test_lightgbm_classifier() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig { n_estimators: 30, num_leaves: 8, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let acc = preds.iter().zip(y.iter()).filter(|(p, t)| p == t).count() as f64 / 100.0;
        assert!(acc > 0.9, "Accuracy too low: {}", acc);
    }

    #[test]
    fn test_lightgbm_predict_proba() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig { n_estimators: 10, num_leaves: 8, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for i in 0..proba.nrows() {
            assert!((proba[[i, 0]] + proba[[i, 1]] - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_max_delta_step_bounds_leaf_output() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig {
            n_estimators: 1,
            learning_rate: 1.0,
            min_child_samples: 2,
            max_delta_step: 0.5,
            ..Default::default()
        };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();

        let raw = model.predict_raw(&x).unwrap();
        for r in raw.iter() {
            assert!((r - model.base_prediction).abs() <= 0.5 + 1e-12);
        }
    }

    #[test]
    fn test_max_depth_limits_leaves() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig { n_estimators: 1, max_depth: Some(1), min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();

        let splits: f64 = model.feature_importances().unwrap().sum();
        assert_eq!(splits, 1.0);
    }

    #[test]
    fn test_lightgbm_goss() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig {
            n_estimators: 10,
            num_leaves: 8,
            min_child_samples: 2,
            boosting_type: BoostingType::Goss,
            top_rate: 0.3,
            other_rate: 0.2,
            ..Default::default()
        };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap().len(), 100);
        assert_eq!(model.n_trees(), 10);
    }

    #[test]
    fn test_deterministic_fit() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig {
            n_estimators: 10,
            min_child_samples: 2,
            subsample: 0.7,
            colsample_bytree: 0.5,
            ..Default::default()
        };
        let mut a = LightGBMClassifier::new(config.clone());
        let mut b = LightGBMClassifier::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_raw(&x).unwrap(), b.predict_raw(&x).unwrap());
    }

    #[test]
    fn test_invalid_config() {
        let (x, y) = make_classification_data();
        let mut model = LightGBMClassifier::new(LightGBMConfig { learning_rate: 0.0, ..Default::default() });
        assert!(matches!(model.fit(&x, &y), Err(KolosalError::InvalidParameter { .. })));
    }
}
