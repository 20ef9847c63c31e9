use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Per-column standardization to zero mean and unit variance.
///
/// Fit on the training split only, then applied to both splits so the
/// held-out evaluation never leaks test statistics into the transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| AnalyticsError::invalid_parameter("cannot fit scaler on empty input"))?;
        let width = first.len();
        if rows.iter().any(|row| row.len() != width) {
            return Err(AnalyticsError::invalid_parameter(
                "ragged feature rows passed to scaler fit",
            ));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }

        let mut stds = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row.iter()).zip(means.iter()) {
                *s += (v - m).powi(2);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt();
            // Constant columns pass through unscaled instead of dividing
            // by zero.
            if *s < 1e-12 {
                *s = 1.0;
            }
        }

        Ok(Self { means, stds })
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.means.len() {
            return Err(AnalyticsError::invalid_parameter(format!(
                "feature dimension mismatch: expected {}, got {}",
                self.means.len(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(self.stds.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn feature_count(&self) -> usize {
        self.means.len()
    }
}
