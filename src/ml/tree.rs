use serde::{Deserialize, Serialize};

/// CART regression tree: binary splits chosen by squared-error
/// reduction, leaves predicting the mean of their training targets.
/// Used directly by the random forest (on bootstrap samples) and by the
/// gradient-boosting ensemble (shallow trees on residuals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 32,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct Split {
    feature: usize,
    threshold: f64,
    cost: f64,
}

impl RegressionTree {
    /// Fit on the subset of `rows`/`targets` selected by `indices`
    /// (duplicates allowed, which is what bootstrap sampling produces).
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], indices: &[usize], params: TreeParams) -> Self {
        let root = build_node(rows, targets, indices, params, 0);
        Self { root }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn build_node(
    rows: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: TreeParams,
    depth: usize,
) -> Node {
    let mean = mean_of(targets, indices);
    if depth >= params.max_depth || indices.len() < params.min_samples_split {
        return Node::Leaf { value: mean };
    }

    let parent_sse = sse_of(targets, indices, mean);
    if parent_sse < 1e-12 {
        return Node::Leaf { value: mean };
    }

    let split = match best_split(rows, targets, indices, params, parent_sse) {
        Some(split) => split,
        None => return Node::Leaf { value: mean },
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| rows[i][split.feature] <= split.threshold);

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(build_node(rows, targets, &left_idx, params, depth + 1)),
        right: Box::new(build_node(rows, targets, &right_idx, params, depth + 1)),
    }
}

/// Exhaustive split search per feature over sorted sample values, using
/// prefix sums so each feature scans in O(m log m).
fn best_split(
    rows: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: TreeParams,
    parent_sse: f64,
) -> Option<Split> {
    let m = indices.len();
    let feature_count = rows[indices[0]].len();
    let mut best: Option<Split> = None;

    let mut order: Vec<usize> = indices.to_vec();
    for feature in 0..feature_count {
        order.sort_by(|&a, &b| {
            rows[a][feature]
                .partial_cmp(&rows[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut sum_left = 0.0;
        let mut sumsq_left = 0.0;
        let total: f64 = order.iter().map(|&i| targets[i]).sum();
        let total_sq: f64 = order.iter().map(|&i| targets[i] * targets[i]).sum();

        for k in 1..m {
            let y = targets[order[k - 1]];
            sum_left += y;
            sumsq_left += y * y;

            if k < params.min_samples_leaf || m - k < params.min_samples_leaf {
                continue;
            }
            let x_left = rows[order[k - 1]][feature];
            let x_right = rows[order[k]][feature];
            if x_left == x_right {
                continue;
            }

            let sum_right = total - sum_left;
            let sumsq_right = total_sq - sumsq_left;
            let cost = (sumsq_left - sum_left * sum_left / k as f64)
                + (sumsq_right - sum_right * sum_right / (m - k) as f64);

            if best.as_ref().map_or(true, |b| cost < b.cost) {
                best = Some(Split {
                    feature,
                    threshold: (x_left + x_right) / 2.0,
                    cost,
                });
            }
        }
    }

    best.filter(|split| parent_sse - split.cost > 1e-12)
}

fn mean_of(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(targets: &[f64], indices: &[usize], mean: f64) -> f64 {
    indices.iter().map(|&i| (targets[i] - mean).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_indices(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_fits_piecewise_constant_data() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();

        let tree = RegressionTree::fit(&rows, &targets, &all_indices(20), TreeParams::default());
        assert!((tree.predict_row(&[2.0]) - 1.0).abs() < 1e-9);
        assert!((tree.predict_row(&[15.0]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_target_yields_single_leaf() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let targets = vec![3.0; 10];
        let tree = RegressionTree::fit(&rows, &targets, &all_indices(10), TreeParams::default());
        assert_eq!(tree.predict_row(&[0.0]), 3.0);
        assert_eq!(tree.predict_row(&[99.0]), 3.0);
    }

    #[test]
    fn test_depth_limit_is_respected() {
        let rows: Vec<Vec<f64>> = (0..16).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let params = TreeParams {
            max_depth: 1,
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&rows, &targets, &all_indices(16), params);

        // A stump partitions the line into exactly two predictions.
        let mut outputs: Vec<f64> = (0..16).map(|i| tree.predict_row(&[i as f64])).collect();
        outputs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        outputs.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn test_multifeature_split_selects_informative_column() {
        // Column 0 is noise, column 1 carries the signal.
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i * 7 % 5) as f64, if i % 2 == 0 { 0.0 } else { 1.0 }])
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| r[1] * 10.0).collect();

        let tree = RegressionTree::fit(&rows, &targets, &all_indices(30), TreeParams::default());
        assert!((tree.predict_row(&[3.0, 0.0]) - 0.0).abs() < 1e-9);
        assert!((tree.predict_row(&[3.0, 1.0]) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_serde_round_trip_preserves_predictions() {
        let rows: Vec<Vec<f64>> = (0..25).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r[0] * 2.0 + r[1]).collect();
        let tree = RegressionTree::fit(&rows, &targets, &all_indices(25), TreeParams::default());

        let json = serde_json::to_string(&tree).unwrap();
        let restored: RegressionTree = serde_json::from_str(&json).unwrap();
        for row in &rows {
            assert_eq!(tree.predict_row(row), restored.predict_row(row));
        }
    }
}
