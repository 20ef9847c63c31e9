use super::ModelKind;
use crate::error::{AnalyticsError, Result};
use crate::ml::{LinearModel, RegressionTree, TreeParams};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// Estimator count for both tree ensembles, matching the training
/// calibration the service has always shipped with.
pub const ENSEMBLE_SIZE: usize = 100;

/// Shrinkage applied to each boosting stage.
pub const BOOSTING_LEARNING_RATE: f64 = 0.1;

/// Depth of the shallow boosting trees.
pub const BOOSTING_TREE_DEPTH: usize = 3;

/// Fixed seed so retraining on identical data reproduces the artifact.
pub const ESTIMATOR_SEED: u64 = 42;

/// A fitted forecasting regressor of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Regressor {
    Linear(LinearModel),
    RandomForest(ForestModel),
    GradientBoosted(BoostedModel),
}

impl Regressor {
    /// Fit the regressor selected by `kind` on standardized features
    /// against raw target values. `Ensemble` trains a gradient-boosted
    /// regressor, its long-standing concrete strategy.
    pub fn fit(kind: ModelKind, rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        match kind {
            ModelKind::Linear => Ok(Regressor::Linear(LinearModel::fit(rows, targets)?)),
            ModelKind::RandomForest => Ok(Regressor::RandomForest(ForestModel::fit(
                rows,
                targets,
                ENSEMBLE_SIZE,
                ESTIMATOR_SEED,
            )?)),
            ModelKind::GradientBoosted | ModelKind::Ensemble => Ok(Regressor::GradientBoosted(
                BoostedModel::fit(rows, targets, ENSEMBLE_SIZE, BOOSTING_LEARNING_RATE)?,
            )),
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Regressor::Linear(model) => model.predict_row(row),
            Regressor::RandomForest(model) => model.predict_row(row),
            Regressor::GradientBoosted(model) => model.predict_row(row),
        }
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Bagged ensemble of full-depth regression trees, each fitted on a
/// bootstrap resample of the training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
}

impl ForestModel {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], n_estimators: usize, seed: u64) -> Result<Self> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(AnalyticsError::invalid_parameter(
                "forest fit requires matching, non-empty features and targets",
            ));
        }

        let mut rng = Pcg64::seed_from_u64(seed);
        let n = rows.len();
        let params = TreeParams::default();

        let trees = (0..n_estimators)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(rows, targets, &sample, params)
            })
            .collect();

        Ok(Self { trees })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees
            .iter()
            .map(|tree| tree.predict_row(row))
            .sum::<f64>()
            / self.trees.len() as f64
    }
}

/// Least-squares gradient boosting: a constant base prediction plus a
/// sequence of shallow trees fitted to the running residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl BoostedModel {
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        n_estimators: usize,
        learning_rate: f64,
    ) -> Result<Self> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(AnalyticsError::invalid_parameter(
                "boosting fit requires matching, non-empty features and targets",
            ));
        }

        let base = targets.iter().sum::<f64>() / targets.len() as f64;
        let indices: Vec<usize> = (0..rows.len()).collect();
        let params = TreeParams {
            max_depth: BOOSTING_TREE_DEPTH,
            ..TreeParams::default()
        };

        let mut current: Vec<f64> = vec![base; targets.len()];
        let mut trees = Vec::with_capacity(n_estimators);

        for _ in 0..n_estimators {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(current.iter())
                .map(|(t, c)| t - c)
                .collect();
            let tree = RegressionTree::fit(rows, &residuals, &indices, params);
            for (c, row) in current.iter_mut().zip(rows.iter()) {
                *c += learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            base,
            learning_rate,
            trees,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|tree| tree.predict_row(row))
                    .sum::<f64>()
    }
}
