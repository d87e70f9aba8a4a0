//! Gradient-boosted regression trees with squared-error loss.
//!
//! Each stage fits a depth-limited CART tree to the current residuals and
//! adds it, shrunk by the learning rate, to the ensemble. Candidate features
//! are visited in a seeded random order at every node and rows are drawn
//! from the same seeded generator, so a fit is reproducible for a given
//! seed and input.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GbrtError {
    #[error("no training samples")]
    EmptyTrainingSet,

    #[error("{features} feature rows but {targets} targets")]
    LengthMismatch { features: usize, targets: usize },

    #[error("expected {expected} features, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("training data contains a non-finite value")]
    NonFiniteInput,

    #[error("invalid parameter: {0}")]
    InvalidParams(String),

    #[error("model structure is corrupt")]
    Corrupt,
}

/// Boosting hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbrtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each stage.
    pub subsample: f64,
    pub seed: u64,
}

impl Default for GbrtParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl GbrtParams {
    pub fn validate(&self) -> Result<(), GbrtError> {
        let invalid = |msg: &str| Err(GbrtError::InvalidParams(msg.to_string()));
        if self.n_estimators == 0 {
            return invalid("n_estimators must be at least 1");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.min_samples_split < 2 {
            return invalid("min_samples_split must be at least 2");
        }
        if self.min_samples_leaf == 0 {
            return invalid("min_samples_leaf must be at least 1");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid("subsample must be in (0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One CART regression tree, nodes stored in an arena with the root at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'d> {
    x: &'d [Vec<f64>],
    targets: &'d [f64],
    params: &'d GbrtParams,
    n_features: usize,
}

impl RegressionTree {
    /// `None` when the tree references a node that does not exist.
    fn predict(&self, row: &[f64]) -> Option<f64> {
        let mut id = 0;
        // A well-formed tree never revisits a node.
        for _ in 0..self.nodes.len() {
            match self.nodes.get(id)? {
                Node::Leaf { value } => return Some(*value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if *row.get(*feature)? <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }
}

impl Grower<'_> {
    fn grow(&self, tree: &mut RegressionTree, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let id = tree.nodes.len();
        tree.nodes.push(Node::Leaf {
            value: mean(rows.iter().map(|&i| self.targets[i])),
        });
        if depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return id;
        }
        let Some(split) = self.best_split(rows, rng) else {
            return id;
        };

        let f = split.feature;
        rows.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));
        let mid = rows.partition_point(|&i| self.x[i][f] <= split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(tree, left_rows, depth + 1, rng);
        let right = self.grow(tree, right_rows, depth + 1, rng);
        tree.nodes[id] = Node::Split {
            feature: f,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Split with the largest reduction in squared error, if any reduces it.
    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<Split> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf;
        let total: f64 = rows.iter().map(|&i| self.targets[i]).sum();
        let parent = total * total / n as f64;

        let mut order: Vec<usize> = (0..self.n_features).collect();
        order.shuffle(rng);

        let mut best: Option<Split> = None;
        let mut sorted = rows.to_vec();
        for feature in order {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut left_sum = 0.0;
            for k in 1..n {
                left_sum += self.targets[sorted[k - 1]];
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let lo = self.x[sorted[k - 1]][feature];
                let hi = self.x[sorted[k]][feature];
                if lo >= hi {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64 - parent;
                if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                    let mid = lo + (hi - lo) / 2.0;
                    best = Some(Split {
                        feature,
                        threshold: if mid < hi { mid } else { lo },
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// A fitted boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    params: GbrtParams,
    n_features: usize,
    init: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: GbrtParams) -> Result<Self, GbrtError> {
        params.validate()?;
        if x.len() != y.len() {
            return Err(GbrtError::LengthMismatch {
                features: x.len(),
                targets: y.len(),
            });
        }
        let Some(first) = x.first() else {
            return Err(GbrtError::EmptyTrainingSet);
        };
        let n_features = first.len();
        if let Some(row) = x.iter().find(|row| row.len() != n_features) {
            return Err(GbrtError::DimensionMismatch {
                expected: n_features,
                found: row.len(),
            });
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(GbrtError::NonFiniteInput);
        }

        let n = y.len();
        let init = mean(y.iter().copied());
        let mut predictions = vec![init; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = ((n as f64 * params.subsample) as usize).clamp(1, n);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&predictions).map(|(t, p)| t - p).collect();
            let mut rows: Vec<usize> = (0..n).collect();
            if sample_size < n {
                rows.shuffle(&mut rng);
                rows.truncate(sample_size);
                rows.sort_unstable();
            }
            let grower = Grower {
                x,
                targets: &residuals,
                params: &params,
                n_features,
            };
            let mut tree = RegressionTree { nodes: Vec::new() };
            grower.grow(&mut tree, &mut rows, 0, &mut rng);

            for (p, row) in predictions.iter_mut().zip(x) {
                *p += params.learning_rate * tree.predict(row).ok_or(GbrtError::Corrupt)?;
            }
            trees.push(tree);
        }

        Ok(Self {
            params,
            n_features,
            init,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> &GbrtParams {
        &self.params
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64, GbrtError> {
        if row.len() != self.n_features {
            return Err(GbrtError::DimensionMismatch {
                expected: self.n_features,
                found: row.len(),
            });
        }
        let mut value = self.init;
        for tree in &self.trees {
            value += self.params.learning_rate * tree.predict(row).ok_or(GbrtError::Corrupt)?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y = x.iter().map(|r| if r[0] < 20.0 { 10.0 } else { 50.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let model = GradientBoostedRegressor::fit(&x, &y, GbrtParams::default()).unwrap();
        assert!((model.predict(&[5.0, 0.0]).unwrap() - 10.0).abs() < 0.5);
        assert!((model.predict(&[35.0, 3.0]).unwrap() - 50.0).abs() < 0.5);
    }

    #[test]
    fn fit_is_deterministic() {
        let (x, y) = step_data();
        let params = GbrtParams {
            subsample: 0.7,
            ..Default::default()
        };
        let a = GradientBoostedRegressor::fit(&x, &y, params).unwrap();
        let b = GradientBoostedRegressor::fit(&x, &y, params).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn constant_target_is_a_single_leaf_per_stage() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![7.0; 3];
        let model = GradientBoostedRegressor::fit(&x, &y, GbrtParams::default()).unwrap();
        assert!(model.trees.iter().all(|t| t.nodes.len() == 1));
        assert_eq!(model.predict(&[100.0]).unwrap(), 7.0);
    }

    #[test]
    fn single_sample_predicts_its_target() {
        let model = GradientBoostedRegressor::fit(&[vec![3.0, 0.2]], &[42.0], GbrtParams::default()).unwrap();
        assert_eq!(model.predict(&[0.0, 0.0]).unwrap(), 42.0);
    }

    #[test]
    fn rejects_bad_input() {
        let p = GbrtParams::default();
        assert_eq!(
            GradientBoostedRegressor::fit(&[], &[], p),
            Err(GbrtError::EmptyTrainingSet)
        );
        assert_eq!(
            GradientBoostedRegressor::fit(&[vec![1.0]], &[1.0, 2.0], p),
            Err(GbrtError::LengthMismatch { features: 1, targets: 2 })
        );
        assert!(matches!(
            GradientBoostedRegressor::fit(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0], p),
            Err(GbrtError::DimensionMismatch { .. })
        ));
        assert_eq!(
            GradientBoostedRegressor::fit(&[vec![f64::NAN]], &[1.0], p),
            Err(GbrtError::NonFiniteInput)
        );
        let bad = GbrtParams {
            subsample: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            GradientBoostedRegressor::fit(&[vec![1.0]], &[1.0], bad),
            Err(GbrtError::InvalidParams(_))
        ));
    }

    #[test]
    fn predict_checks_dimension() {
        let model = GradientBoostedRegressor::fit(&[vec![1.0, 2.0]], &[1.0], GbrtParams::default()).unwrap();
        assert!(matches!(
            model.predict(&[1.0]),
            Err(GbrtError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn dangling_child_is_corrupt_not_a_panic() {
        let tree = RegressionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 5,
                right: 6,
            }],
        };
        assert_eq!(tree.predict(&[1.0]), None);
        let looping = RegressionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        assert_eq!(looping.predict(&[1.0]), None);
    }
}
