use crate::error::{AnalyticsError, Result};
use crate::ml::percentile;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// Tree count for the outlier ensemble.
pub const DEFAULT_TREES: usize = 100;

/// Per-tree subsample ceiling; small subsamples are what make isolation
/// paths informative.
pub const DEFAULT_SUBSAMPLE: usize = 256;

/// Share of training points calibrated to score as outliers. This is a
/// training-time calibration constant, not the runtime sensitivity.
pub const CONTAMINATION: f64 = 0.1;

/// Isolation forest outlier model.
///
/// Anomalies isolate in few random splits, so short average path
/// lengths mean outliers. Scores follow the standard normalization
/// `2^(-E[h(x)]/c(n))`, negated so that larger is more normal, and the
/// decision function subtracts an offset placed at the contamination
/// percentile of the training scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsoNode>,
    sample_size: usize,
    offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IsoNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
}

impl IsolationForest {
    pub fn fit(rows: &[Vec<f64>], n_trees: usize, seed: u64) -> Result<Self> {
        if rows.is_empty() {
            return Err(AnalyticsError::invalid_parameter(
                "isolation forest fit requires a non-empty sample",
            ));
        }

        let n = rows.len();
        let sample_size = DEFAULT_SUBSAMPLE.min(n);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = Pcg64::seed_from_u64(seed);

        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            let sample = sample_without_replacement(n, sample_size, &mut rng);
            trees.push(build_tree(rows, &sample, 0, height_limit, &mut rng));
        }

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };
        let training_scores: Vec<f64> = rows.iter().map(|row| forest.score_sample(row)).collect();
        forest.offset = percentile(&training_scores, CONTAMINATION * 100.0);
        Ok(forest)
    }

    /// Normalized score in (-1, 0); larger values are more normal.
    pub fn score_sample(&self, row: &[f64]) -> f64 {
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        -(2f64.powf(-avg_path / average_path_length(self.sample_size)))
    }

    /// Signed score relative to the contamination threshold; negative
    /// values classify as outliers.
    pub fn decision_function(&self, row: &[f64]) -> f64 {
        self.score_sample(row) - self.offset
    }

    pub fn is_outlier(&self, row: &[f64]) -> bool {
        self.decision_function(row) < 0.0
    }
}

fn sample_without_replacement(n: usize, k: usize, rng: &mut Pcg64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

fn build_tree(
    rows: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut Pcg64,
) -> IsoNode {
    if depth >= height_limit || indices.len() <= 1 {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    // Only features with spread in this partition can split it.
    let feature_count = rows[indices[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..feature_count)
        .filter_map(|f| {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &i in indices {
                min = min.min(rows[i][f]);
                max = max.max(rows[i][f]);
            }
            (max > min).then_some((f, min, max))
        })
        .collect();

    if splittable.is_empty() {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = min + rng.gen::<f64>() * (max - min);

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| rows[i][feature] < threshold);

    IsoNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(rows, &left_idx, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(rows, &right_idx, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &IsoNode, row: &[f64], depth: usize) -> f64 {
    match node {
        IsoNode::Leaf { size } => depth as f64 + average_path_length(*size),
        IsoNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let next = if row[*feature] < *threshold { left } else { right };
            path_length(next, row, depth + 1)
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points,
/// used as the normalization constant of the isolation score.
fn average_path_length(n: usize) -> f64 {
    const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
