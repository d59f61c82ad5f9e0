//! Isolation forest over a single numeric feature.
//!
//! Points that random axis splits separate early get short average path
//! lengths and therefore high scores. The decision threshold is the score
//! percentile matching the expected contamination share.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Uniform;

use crate::error::{ModelError, ModelResult};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        split_value: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build(data: &[f64], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::build_node(data, 0, max_depth, rng),
        }
    }

    fn build_node(data: &[f64], depth: usize, max_depth: usize, rng: &mut StdRng) -> IsolationNode {
        if depth >= max_depth || data.len() <= 1 {
            return IsolationNode::Leaf { size: data.len() };
        }

        let min_val = data.iter().copied().fold(f64::INFINITY, f64::min);
        let max_val = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max_val - min_val <= 0.0 {
            return IsolationNode::Leaf { size: data.len() };
        }

        let split_value = rng.sample(Uniform::new(min_val, max_val));
        let (left, right): (Vec<f64>, Vec<f64>) = data.iter().partition(|&&v| v < split_value);

        IsolationNode::Internal {
            split_value,
            left: Box::new(Self::build_node(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(&right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, x: f64) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth as f64 + average_path_length(*size),
                IsolationNode::Internal {
                    split_value,
                    left,
                    right,
                } => {
                    node = if x < *split_value { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful binary-search-tree lookup among
/// `n` points; normalises depths of leaves that were not split further.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 100].
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.02,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Grows the forest on `data` and calibrates the threshold on the same data.
    pub fn fit(data: &[f64], params: &ForestParams) -> ModelResult<Self> {
        if data.is_empty() {
            return Err(ModelError::InsufficientData { needed: 1, got: 0 });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("isolation forest input".into()));
        }
        if params.n_trees == 0 || params.max_samples == 0 {
            return Err(ModelError::InvalidInput(
                "n_trees and max_samples must be positive".into(),
            ));
        }
        let c = params.contamination;
        if !(c > 0.0 && c <= 0.5) {
            return Err(ModelError::InvalidInput(format!(
                "contamination must be in (0, 0.5], got {c}"
            )));
        }

        let sample_size = params.max_samples.min(data.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_trees)
            .map(|_| {
                let sample: Vec<f64> = data
                    .choose_multiple(&mut rng, sample_size)
                    .copied()
                    .collect();
                IsolationTree::build(&sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };
        let scores = forest.score_all(data);
        forest.threshold = percentile(&scores, 100.0 * (1.0 - c));
        Ok(forest)
    }

    /// Anomaly score in (0, 1]; higher means easier to isolate.
    pub fn score(&self, x: f64) -> f64 {
        let c_n = average_path_length(self.sample_size);
        if c_n <= 0.0 {
            return 0.5;
        }
        let mean_path = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len() as f64;
        2.0_f64.powf(-mean_path / c_n)
    }

    pub fn score_all(&self, data: &[f64]) -> Vec<f64> {
        data.iter().map(|&x| self.score(x)).collect()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Points scoring strictly above the threshold.
    pub fn predict(&self, data: &[f64]) -> Vec<bool> {
        data.iter().map(|&x| self.score(x) > self.threshold).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(25));
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_outlier_scores_highest() {
        let mut data = vec![40.0; 24];
        data.push(500.0);
        let forest = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        let scores = forest.score_all(&data);
        assert!(scores[24] > 0.8, "outlier score {}", scores[24]);
        assert!(scores[..24].iter().all(|s| *s < 0.5));
        let flags = forest.predict(&data);
        assert!(flags[24]);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
    }

    #[test]
    fn test_constant_data_flags_nothing() {
        let data = vec![7.0; 30];
        let forest = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        assert!(forest.predict(&data).iter().all(|f| !f));
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data: Vec<f64> = (0..50).map(|i| ((i * 37) % 11) as f64).collect();
        let a = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        let b = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        assert_eq!(a.score_all(&data), b.score_all(&data));
        assert_eq!(a.threshold(), b.threshold());
    }

    #[test]
    fn test_rejects_bad_input() {
        let params = ForestParams::default();
        assert!(IsolationForest::fit(&[], &params).is_err());
        assert!(IsolationForest::fit(&[1.0, f64::NAN], &params).is_err());
        let bad = ForestParams {
            contamination: 0.9,
            ..params
        };
        assert!(IsolationForest::fit(&[1.0, 2.0], &bad).is_err());
    }
}
