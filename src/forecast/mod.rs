/// Forecast model lifecycle manager.
///
/// Trains, evaluates, persists and reloads per-(entity, metric, kind)
/// regressors over engineered feature tables, and produces
/// future-horizon predictions with a dispersion-based confidence score.
/// Artifacts live in an owned in-memory map backed by the durable store;
/// concurrent training of the same key is serialized per key.
pub mod models;

use crate::cancel::CancellationToken;
use crate::error::{AnalyticsError, Result};
use crate::features::{calendar_features, rolling_mean, rolling_std, FeatureTable, FEATURE_COLUMNS, LAG_OFFSETS};
use crate::ml::{mean_absolute_error, root_mean_squared_error, StandardScaler};
use crate::store::{ArtifactClass, ArtifactStore, ModelKey, RetrainReport};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use models::Regressor;

/// Minimum feature-table rows required to train a forecaster.
pub const MIN_TRAINING_ROWS: usize = 30;

/// Temporal train fraction; the remainder is the held-out evaluation
/// split. No shuffling: splitting in time order preserves causality.
const TRAIN_FRACTION: f64 = 0.8;

/// Observed values carried in the artifact for recursive lag synthesis.
const HISTORY_TAIL_LEN: usize = 30;

/// Supported regression strategies. `Ensemble` is a stable alias that
/// trains a gradient-boosted regressor under its own cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Linear,
    RandomForest,
    GradientBoosted,
    Ensemble,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Linear,
        ModelKind::RandomForest,
        ModelKind::GradientBoosted,
        ModelKind::Ensemble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::RandomForest => "random-forest",
            ModelKind::GradientBoosted => "gradient-boosted",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

impl FromStr for ModelKind {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(ModelKind::Linear),
            "random-forest" => Ok(ModelKind::RandomForest),
            "gradient-boosted" => Ok(ModelKind::GradientBoosted),
            "ensemble" => Ok(ModelKind::Ensemble),
            other => Err(AnalyticsError::invalid_parameter(format!(
                "unknown model kind '{}' (expected linear, random-forest, gradient-boosted or ensemble)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Held-out evaluation summary returned by `train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_kind: ModelKind,
    pub mae: f64,
    pub rmse: f64,
    pub training_samples: usize,
    pub test_samples: usize,
    pub feature_count: usize,
}

/// One predicted future observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_value: f64,
    pub confidence: f64,
}

/// Full horizon forecast for one (entity, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub entity_id: String,
    pub metric: String,
    pub values: Vec<ForecastPoint>,
    pub confidence: f64,
    pub model_kind: ModelKind,
    pub generated_at: DateTime<Utc>,
}

/// Durable training result: the fitted model, its scaler, and the tail
/// of observed values needed to synthesize lag/rolling features for
/// future dates. Immutable once trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastArtifact {
    pub model: Regressor,
    pub scaler: StandardScaler,
    pub history_tail: Vec<f64>,
    pub trained_at: DateTime<Utc>,
    pub report: TrainingReport,
}

/// Where an artifact for a given kind currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    Loaded,
    Persisted,
    Untrained,
}

/// Owns the forecast artifacts for one service instance; created at
/// service start and dropped at shutdown, so tests can run isolated
/// instances side by side.
#[derive(Debug)]
pub struct ForecastModelManager {
    store: ArtifactStore,
    models: RwLock<HashMap<ModelKey, Arc<ForecastArtifact>>>,
    train_locks: Mutex<HashMap<ModelKey, Arc<Mutex<()>>>>,
    ready: AtomicBool,
}

impl ForecastModelManager {
    pub fn new<P: AsRef<Path>>(cache_root: P) -> Result<Self> {
        Ok(Self {
            store: ArtifactStore::new(cache_root.as_ref().to_path_buf())?,
            models: RwLock::new(HashMap::new()),
            train_locks: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        })
    }

    /// True once at least one train or cache load has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn key_for(entity_id: &str, metric: &str, kind: ModelKind) -> ModelKey {
        ModelKey::new(entity_id, metric, kind.as_str())
    }

    fn train_lock(&self, key: &ModelKey) -> Arc<Mutex<()>> {
        self.train_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Train a regressor for the key and persist the artifact,
    /// overwriting any prior artifact. Fails with `InsufficientData`
    /// below `MIN_TRAINING_ROWS`; fit failures surface as
    /// `Computation` with the key attached.
    pub fn train(
        &self,
        table: &FeatureTable,
        entity_id: &str,
        metric: &str,
        kind: ModelKind,
    ) -> Result<TrainingReport> {
        if table.len() < MIN_TRAINING_ROWS {
            return Err(AnalyticsError::insufficient_data(MIN_TRAINING_ROWS, table.len()));
        }

        let key = Self::key_for(entity_id, metric, kind);
        let lock = self.train_lock(&key);
        let _guard = lock.lock();

        let split = (table.len() as f64 * TRAIN_FRACTION) as usize;
        let (train_rows, test_rows) = table.rows().split_at(split);
        let (train_targets, test_targets) = table.values().split_at(split);

        let scaler = StandardScaler::fit(train_rows)
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;
        let train_scaled = scaler
            .transform(train_rows)
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;
        let test_scaled = scaler
            .transform(test_rows)
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;

        let model = Regressor::fit(kind, &train_scaled, train_targets)
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;

        let predicted = model.predict(&test_scaled);
        let report = TrainingReport {
            model_kind: kind,
            mae: mean_absolute_error(test_targets, &predicted),
            rmse: root_mean_squared_error(test_targets, &predicted),
            training_samples: train_rows.len(),
            test_samples: test_rows.len(),
            feature_count: FEATURE_COLUMNS.len(),
        };

        let tail_start = table.len() - HISTORY_TAIL_LEN.min(table.len());
        let artifact = ForecastArtifact {
            model,
            scaler,
            history_tail: table.values()[tail_start..].to_vec(),
            trained_at: Utc::now(),
            report: report.clone(),
        };

        self.store.save(&key, ArtifactClass::Forecast, &artifact)?;
        self.models.write().insert(key.clone(), Arc::new(artifact));
        self.ready.store(true, Ordering::SeqCst);

        log::info!(
            "trained forecaster {} (mae {:.4}, rmse {:.4})",
            key,
            report.mae,
            report.rmse
        );
        Ok(report)
    }

    /// Predict one value per day in `[1, horizon_days]`, anchored to the
    /// current instant.
    ///
    /// Future lag/rolling features are synthesized recursively: each
    /// step's prediction is appended to the artifact's history tail and
    /// feeds the next step's lags.
    pub fn predict(
        &self,
        entity_id: &str,
        metric: &str,
        horizon_days: u32,
        kind: ModelKind,
    ) -> Result<Forecast> {
        if horizon_days == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "forecast horizon must be at least one day",
            ));
        }

        let key = Self::key_for(entity_id, metric, kind);
        let artifact = self.artifact(&key)?;

        let now = Utc::now();
        let mut working = artifact.history_tail.clone();
        let mut scaled_rows = Vec::with_capacity(horizon_days as usize);
        let mut raw = Vec::with_capacity(horizon_days as usize);
        let mut timestamps = Vec::with_capacity(horizon_days as usize);

        for day in 1..=i64::from(horizon_days) {
            let ts = now + Duration::days(day);
            let row = synthesize_feature_row(ts, &working);
            let scaled = artifact
                .scaler
                .transform_row(&row)
                .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;

            let predicted = artifact.model.predict_row(&scaled);
            scaled_rows.push(scaled);
            working.push(predicted);
            raw.push(predicted);
            timestamps.push(ts);
        }

        let confidence = dispersion_confidence(&scaled_rows);
        let values = timestamps
            .into_iter()
            .zip(raw)
            .map(|(timestamp, predicted_value)| ForecastPoint {
                timestamp,
                predicted_value,
                confidence,
            })
            .collect();

        Ok(Forecast {
            entity_id: entity_id.to_string(),
            metric: metric.to_string(),
            values,
            confidence,
            model_kind: kind,
            generated_at: now,
        })
    }

    /// Artifact lookup: memory first, then the durable cache. Cache-miss
    /// loads are idempotent; the last writer into the map wins and both
    /// writers hold identical immutable artifacts.
    fn artifact(&self, key: &ModelKey) -> Result<Arc<ForecastArtifact>> {
        if let Some(artifact) = self.models.read().get(key) {
            return Ok(artifact.clone());
        }

        match self.store.load::<ForecastArtifact>(key, ArtifactClass::Forecast)? {
            Some(artifact) => {
                let artifact = Arc::new(artifact);
                self.models.write().insert(key.clone(), artifact.clone());
                self.ready.store(true, Ordering::SeqCst);
                Ok(artifact)
            }
            None => Err(AnalyticsError::model_unavailable(key.to_string())),
        }
    }

    /// Artifact state per model kind for one (entity, metric) pair.
    pub fn model_info(&self, entity_id: &str, metric: &str) -> IndexMap<ModelKind, ArtifactState> {
        let loaded = self.models.read();
        ModelKind::ALL
            .iter()
            .map(|&kind| {
                let key = Self::key_for(entity_id, metric, kind);
                let state = if loaded.contains_key(&key) {
                    ArtifactState::Loaded
                } else if self.store.exists(&key, ArtifactClass::Forecast) {
                    ArtifactState::Persisted
                } else {
                    ArtifactState::Untrained
                };
                (kind, state)
            })
            .collect()
    }

    /// Every key this manager knows about: resident artifacts plus
    /// everything persisted under the cache root.
    pub fn known_keys(&self) -> Result<Vec<ModelKey>> {
        let mut keys: Vec<ModelKey> = self.models.read().keys().cloned().collect();
        keys.extend(self.store.list(ArtifactClass::Forecast)?);
        keys.sort_by(|a, b| a.file_stem().cmp(&b.file_stem()));
        keys.dedup();
        Ok(keys)
    }

    /// Re-train every known key with fresh data supplied by the caller.
    /// Keys fail independently; a failure is logged and the sweep moves
    /// on. Cancellation is honored between keys, never mid-fit.
    pub fn retrain<F>(&self, fetch: F, cancel: &CancellationToken) -> Result<RetrainReport>
    where
        F: Fn(&ModelKey) -> Result<FeatureTable> + Sync,
    {
        let keys = self.known_keys()?;
        let outcomes: Vec<Option<(ModelKey, std::result::Result<(), String>)>> = keys
            .par_iter()
            .map(|key| {
                if cancel.is_cancelled() {
                    return None;
                }
                let outcome = key
                    .variant
                    .parse::<ModelKind>()
                    .and_then(|kind| {
                        let table = fetch(key)?;
                        self.train(&table, &key.entity_id, &key.metric, kind)
                    })
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                if let Err(message) = &outcome {
                    log::warn!("retrain failed for {}: {}", key, message);
                }
                Some((key.clone(), outcome))
            })
            .collect();

        let mut report = RetrainReport {
            cancelled: cancel.is_cancelled(),
            ..RetrainReport::default()
        };
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                (key, Ok(())) => report.succeeded.push(key),
                (key, Err(message)) => report.failed.push((key, message)),
            }
        }
        log::info!(
            "forecast retrain sweep: {} ok, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// Build one future feature row from a timestamp and the running value
/// window (observed history extended with prior predictions).
fn synthesize_feature_row(ts: DateTime<Utc>, working: &[f64]) -> Vec<f64> {
    let mut row = Vec::with_capacity(FEATURE_COLUMNS.len());
    row.extend_from_slice(&calendar_features(ts));

    let end = working.len() - 1;
    for lag in LAG_OFFSETS {
        // The tail always spans the longest lag; index directly.
        row.push(working[working.len() - lag]);
    }
    row.push(rolling_mean(working, end, 7));
    row.push(rolling_std(working, end, 7));
    row.push(rolling_mean(working, end, 30));
    row
}

/// Confidence heuristic from the dispersion of the standardized future
/// features: tight feature spread reads as higher confidence. Clamped to
/// [0.1, 0.95]; not calibrated against held-out error.
fn dispersion_confidence(scaled_rows: &[Vec<f64>]) -> f64 {
    if scaled_rows.is_empty() {
        return 0.1;
    }
    let width = scaled_rows[0].len();
    let n = scaled_rows.len() as f64;

    let mut mean_variance = 0.0;
    for col in 0..width {
        let mean: f64 = scaled_rows.iter().map(|r| r[col]).sum::<f64>() / n;
        let var: f64 = scaled_rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        mean_variance += var;
    }
    mean_variance /= width as f64;

    (1.0 - mean_variance / 10.0).clamp(0.1, 0.95)
}
