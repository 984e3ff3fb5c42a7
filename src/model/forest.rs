// 🌲 Isolation Forest
// Random axis-aligned partitioning; anomalies isolate in fewer splits.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Upper bound on samples drawn per tree
pub const MAX_SAMPLES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    /// Path length of `x`, adjusted by the expected depth of the leaf's
    /// unresolved subtree
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationForest {
    pub trees: Vec<Node>,
    pub max_samples: usize,
    pub contamination: f64,
    /// Decision threshold: the contamination percentile of training scores
    pub offset: f64,
}

impl IsolationForest {
    pub fn fit(rows: &[Vec<f64>], n_estimators: usize, contamination: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = rows.len();
        let max_samples = n.min(MAX_SAMPLES).max(1);
        let max_depth = (max_samples as f64).log2().ceil().max(0.0) as usize;

        let trees = (0..n_estimators.max(1))
            .map(|_| {
                let idx: Vec<usize> = if n == 0 {
                    Vec::new()
                } else {
                    sample(&mut rng, n, max_samples).into_vec()
                };
                build_tree(rows, idx, 0, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            max_samples,
            contamination,
            offset: -0.5,
        };

        if n > 0 {
            let mut scores = forest.score_samples(rows);
            scores.sort_by(|a, b| a.total_cmp(b));
            forest.offset = percentile(&scores, contamination * 100.0);
        }

        forest
    }

    /// Opposite of the anomaly score: in `[-1, 0]`, lower is more abnormal
    pub fn score_sample(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        let mean_depth = total / self.trees.len().max(1) as f64;
        let norm = average_path_length(self.max_samples);
        if norm == 0.0 {
            return -0.5;
        }
        -(2f64.powf(-mean_depth / norm))
    }

    pub fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|x| self.score_sample(x)).collect()
    }

    /// Positive for inliers, negative for outliers
    pub fn decision_function(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter()
            .map(|x| self.score_sample(x) - self.offset)
            .collect()
    }
}

fn build_tree(
    rows: &[Vec<f64>],
    idx: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || idx.len() <= 1 {
        return Node::Leaf { size: idx.len() };
    }

    // Features with spread inside this node
    let width = rows[idx[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|f| {
            let (lo, hi) = idx.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(rows[i][f]), hi.max(rows[i][f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        return Node::Leaf { size: idx.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);

    let (left, right): (Vec<usize>, Vec<usize>) =
        idx.into_iter().partition(|&i| rows[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(rows, right, depth + 1, max_depth, rng)),
    }
}

/// Linear-interpolated percentile of an ascending slice
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let t = i as f64;
                vec![(t * 0.37).sin() * 0.5, (t * 0.11).cos() * 0.5]
            })
            .collect();
        rows.push(vec![25.0, -30.0]);
        rows
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!(c256 > 10.0 && c256 < 11.0);
    }

    #[test]
    fn test_outlier_scores_lowest() {
        let rows = cluster_with_outlier();
        let forest = IsolationForest::fit(&rows, 100, 0.02, 42);
        let scores = forest.decision_function(&rows);

        let outlier = scores[200];
        assert!(scores[..200].iter().all(|&s| s > outlier));
        assert!(outlier < 0.0);
    }

    #[test]
    fn test_contamination_sets_anomaly_share() {
        let rows = cluster_with_outlier();
        let forest = IsolationForest::fit(&rows, 100, 0.02, 42);
        let flagged = forest
            .decision_function(&rows)
            .iter()
            .filter(|&&s| s < 0.0)
            .count();
        // 2% of 201 rows, give or take ties at the threshold
        assert!((1..=5).contains(&flagged), "flagged {}", flagged);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let rows = cluster_with_outlier();
        let a = IsolationForest::fit(&rows, 10, 0.02, 7);
        let b = IsolationForest::fit(&rows, 10, 0.02, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_data_builds_leaves() {
        let rows = vec![vec![1.0, 1.0]; 10];
        let forest = IsolationForest::fit(&rows, 5, 0.02, 1);
        assert!(forest.trees.iter().all(|t| matches!(t, Node::Leaf { size: 10 })));
        assert!(forest.decision_function(&rows).iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 50.0), 3.0);
        assert!((percentile(&v, 10.0) - 1.4).abs() < 1e-12);
    }
}
