/// Shared estimator building blocks:
/// - feature standardization (fit on the training split only)
/// - ordinary-least-squares linear regression
/// - CART regression trees, reused by the forest and boosting ensembles
pub mod linear;
pub mod scaler;
pub mod tree;

pub use linear::LinearModel;
pub use scaler::StandardScaler;
pub use tree::{RegressionTree, TreeParams};

/// Mean absolute error over a held-out split.
pub fn mean_absolute_error(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predicted.iter())
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / truth.len() as f64
}

/// Root mean squared error over a held-out split.
pub fn root_mean_squared_error(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let mse = truth
        .iter()
        .zip(predicted.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / truth.len() as f64;
    mse.sqrt()
}

/// Linear-interpolation percentile of an unsorted sample, `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let fraction = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metrics() {
        let truth = [1.0, 2.0, 3.0];
        let predicted = [1.0, 3.0, 5.0];
        assert!((mean_absolute_error(&truth, &predicted) - 1.0).abs() < 1e-12);
        let expected_rmse = (5.0f64 / 3.0).sqrt();
        assert!((root_mean_squared_error(&truth, &predicted) - expected_rmse).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert!((percentile(&values, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 25.0) - 1.75).abs() < 1e-12);
    }
}
