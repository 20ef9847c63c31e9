use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Ordinary-least-squares linear regression fitted via the normal
/// equations. A small ridge term on the diagonal keeps the system
/// solvable when a standardized column degenerates to a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

const RIDGE_EPSILON: f64 = 1e-8;

impl LinearModel {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(AnalyticsError::invalid_parameter(
                "linear fit requires matching, non-empty features and targets",
            ));
        }
        let width = rows[0].len();

        // Augmented system: last column is the intercept.
        let dim = width + 1;
        let mut gram = vec![vec![0.0; dim]; dim];
        let mut moment = vec![0.0; dim];

        for (row, &y) in rows.iter().zip(targets.iter()) {
            for i in 0..dim {
                let xi = if i < width { row[i] } else { 1.0 };
                moment[i] += xi * y;
                for j in 0..dim {
                    let xj = if j < width { row[j] } else { 1.0 };
                    gram[i][j] += xi * xj;
                }
            }
        }
        for i in 0..dim {
            gram[i][i] += RIDGE_EPSILON;
        }

        let solution = solve(gram, moment)?;
        let (coefficients, intercept) = solution.split_at(width);
        Ok(Self {
            coefficients: coefficients.to_vec(),
            intercept: intercept[0],
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row.iter())
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(AnalyticsError::invalid_parameter(
                "singular normal-equation system in linear fit",
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}
