/// Anomaly model lifecycle manager.
///
/// Trains, persists and reloads per-(entity, metric, method) outlier
/// baselines and models, and scores recent-window feature tables. Two
/// methods are supported: an isolation-forest density model over the
/// engineered features, and a pure statistical z-score test against the
/// persisted baseline. The baseline is always computed and persisted,
/// whichever method is trained.
pub mod isolation;

use crate::cancel::CancellationToken;
use crate::error::{AnalyticsError, Result};
use crate::features::FeatureTable;
use crate::ml::{percentile, StandardScaler};
use crate::store::{ArtifactClass, ArtifactStore, ModelKey, RetrainReport};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use isolation::IsolationForest;

/// Minimum feature-table rows required to train a detector.
pub const MIN_TRAINING_ROWS: usize = 50;

/// Decision-score magnitude above which an isolation-forest hit is
/// reported as high severity.
const HIGH_SEVERITY_SCORE: f64 = 0.7;

/// Z-score above which a statistical hit is reported as high severity.
const HIGH_SEVERITY_ZSCORE: f64 = 3.0;

/// Seed for the isolation forest, shared with the forecasting ensembles.
const DETECTOR_SEED: u64 = 42;

/// Supported detection methods. `zscore` parses as an alias for the
/// statistical method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyMethod {
    IsolationForest,
    Statistical,
}

impl AnomalyMethod {
    pub const ALL: [AnomalyMethod; 2] = [AnomalyMethod::IsolationForest, AnomalyMethod::Statistical];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyMethod::IsolationForest => "isolation-forest",
            AnomalyMethod::Statistical => "statistical",
        }
    }
}

impl FromStr for AnomalyMethod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "isolation-forest" => Ok(AnomalyMethod::IsolationForest),
            "statistical" | "zscore" => Ok(AnomalyMethod::Statistical),
            other => Err(AnalyticsError::invalid_parameter(format!(
                "unknown detection method '{}' (expected isolation-forest or statistical)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AnomalyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a flagged point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

/// Summary statistics of the training target column, computed at
/// training time and persisted for every method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyBaseline {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
    pub sample_count: usize,
}

impl AnomalyBaseline {
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let std =
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        Self {
            mean,
            std,
            median: percentile(values, 50.0),
            q25: percentile(values, 25.0),
            q75: percentile(values, 75.0),
            sample_count: n,
        }
    }
}

/// Training summary returned by `train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyTrainingReport {
    pub method: AnomalyMethod,
    pub training_samples: usize,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    pub feature_count: usize,
}

/// One flagged observation. `score` is the isolation decision score or
/// the z-score, depending on the method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
    pub severity: Severity,
    pub description: String,
}

/// Detection result over one scoring window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub entity_id: String,
    pub metric: String,
    pub anomalies: Vec<AnomalyPoint>,
    pub total_points: usize,
    pub anomaly_percentage: f64,
    pub method: AnomalyMethod,
    pub sensitivity: f64,
    pub baseline: AnomalyBaseline,
    pub generated_at: DateTime<Utc>,
}

/// Durable training result. The model is present only for the
/// isolation-forest method; the baseline and scaler always are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyArtifact {
    pub method: AnomalyMethod,
    pub baseline: AnomalyBaseline,
    pub scaler: StandardScaler,
    pub model: Option<IsolationForest>,
    pub trained_at: DateTime<Utc>,
}

/// Owns the anomaly artifacts for one service instance; same lifetime
/// and locking discipline as the forecast manager.
#[derive(Debug)]
pub struct AnomalyModelManager {
    store: ArtifactStore,
    artifacts: RwLock<HashMap<ModelKey, Arc<AnomalyArtifact>>>,
    train_locks: Mutex<HashMap<ModelKey, Arc<Mutex<()>>>>,
    ready: AtomicBool,
}

impl AnomalyModelManager {
    pub fn new<P: AsRef<Path>>(cache_root: P) -> Result<Self> {
        Ok(Self {
            store: ArtifactStore::new(cache_root.as_ref().to_path_buf())?,
            artifacts: RwLock::new(HashMap::new()),
            train_locks: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        })
    }

    /// True once at least one train or cache load has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn detection_methods() -> Vec<&'static str> {
        vec!["isolation-forest", "statistical", "zscore"]
    }

    fn key_for(entity_id: &str, metric: &str, method: AnomalyMethod) -> ModelKey {
        ModelKey::new(entity_id, metric, method.as_str())
    }

    fn train_lock(&self, key: &ModelKey) -> Arc<Mutex<()>> {
        self.train_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Train a detector for the key and persist the artifact,
    /// overwriting any prior artifact. The baseline is computed from the
    /// raw target column regardless of method.
    pub fn train(
        &self,
        table: &FeatureTable,
        entity_id: &str,
        metric: &str,
        method: AnomalyMethod,
    ) -> Result<AnomalyTrainingReport> {
        if table.len() < MIN_TRAINING_ROWS {
            return Err(AnalyticsError::insufficient_data(MIN_TRAINING_ROWS, table.len()));
        }

        let key = Self::key_for(entity_id, metric, method);
        let lock = self.train_lock(&key);
        let _guard = lock.lock();

        let baseline = AnomalyBaseline::from_values(table.values());
        let scaler = StandardScaler::fit(table.rows())
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;

        let model = match method {
            AnomalyMethod::IsolationForest => {
                let scaled = scaler
                    .transform(table.rows())
                    .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;
                let forest = IsolationForest::fit(&scaled, isolation::DEFAULT_TREES, DETECTOR_SEED)
                    .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;
                Some(forest)
            }
            AnomalyMethod::Statistical => None,
        };

        let artifact = AnomalyArtifact {
            method,
            baseline: baseline.clone(),
            scaler,
            model,
            trained_at: Utc::now(),
        };

        self.store.save(&key, ArtifactClass::Anomaly, &artifact)?;
        self.artifacts.write().insert(key.clone(), Arc::new(artifact));
        self.ready.store(true, Ordering::SeqCst);

        log::info!(
            "trained detector {} (baseline mean {:.4}, std {:.4})",
            key,
            baseline.mean,
            baseline.std
        );
        Ok(AnomalyTrainingReport {
            method,
            training_samples: table.len(),
            baseline_mean: baseline.mean,
            baseline_std: baseline.std,
            feature_count: table.feature_count(),
        })
    }

    /// Score a recent window. `sensitivity` must lie strictly inside
    /// (0, 1), lower being more sensitive, and is rejected before any
    /// other work. The window table is supplied by the caller; the
    /// manager does not own the notion of "recent".
    pub fn detect(
        &self,
        entity_id: &str,
        metric: &str,
        sensitivity: f64,
        method: AnomalyMethod,
        window: &FeatureTable,
    ) -> Result<AnomalyReport> {
        if !(sensitivity > 0.0 && sensitivity < 1.0) {
            return Err(AnalyticsError::invalid_parameter(format!(
                "sensitivity must lie in (0, 1), got {}",
                sensitivity
            )));
        }

        let key = Self::key_for(entity_id, metric, method);
        let artifact = self.artifact(&key)?;

        let anomalies = match method {
            AnomalyMethod::IsolationForest => {
                self.detect_isolation(&key, &artifact, metric, window)?
            }
            AnomalyMethod::Statistical => {
                self.detect_statistical(&key, &artifact.baseline, sensitivity, window)?
            }
        };

        let total_points = window.len();
        let anomaly_percentage = if total_points > 0 {
            anomalies.len() as f64 / total_points as f64 * 100.0
        } else {
            0.0
        };

        Ok(AnomalyReport {
            entity_id: entity_id.to_string(),
            metric: metric.to_string(),
            anomalies,
            total_points,
            anomaly_percentage,
            method,
            sensitivity,
            baseline: artifact.baseline.clone(),
            generated_at: Utc::now(),
        })
    }

    fn detect_isolation(
        &self,
        key: &ModelKey,
        artifact: &AnomalyArtifact,
        metric: &str,
        window: &FeatureTable,
    ) -> Result<Vec<AnomalyPoint>> {
        let model = artifact.model.as_ref().ok_or_else(|| {
            AnalyticsError::computation(key.to_string(), "artifact holds no fitted outlier model")
        })?;
        let scaled = artifact
            .scaler
            .transform(window.rows())
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;

        let mut anomalies = Vec::new();
        for ((row, &ts), &value) in scaled
            .iter()
            .zip(window.timestamps().iter())
            .zip(window.values().iter())
        {
            let score = model.decision_function(row);
            if score < 0.0 {
                let severity = if score.abs() > HIGH_SEVERITY_SCORE {
                    Severity::High
                } else {
                    Severity::Medium
                };
                anomalies.push(AnomalyPoint {
                    timestamp: ts,
                    value,
                    score,
                    severity,
                    description: format!("Unusual {} value detected", metric),
                });
            }
        }
        Ok(anomalies)
    }

    fn detect_statistical(
        &self,
        key: &ModelKey,
        baseline: &AnomalyBaseline,
        sensitivity: f64,
        window: &FeatureTable,
    ) -> Result<Vec<AnomalyPoint>> {
        // Two-sided threshold at the requested sensitivity.
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| AnalyticsError::computation(key.to_string(), e.to_string()))?;
        let threshold = normal.inverse_cdf(1.0 - sensitivity / 2.0);

        let mut anomalies = Vec::new();
        for (&ts, &value) in window.timestamps().iter().zip(window.values().iter()) {
            let z = if baseline.std > 0.0 {
                ((value - baseline.mean) / baseline.std).abs()
            } else {
                0.0
            };
            if z > threshold {
                let severity = if z > HIGH_SEVERITY_ZSCORE {
                    Severity::High
                } else {
                    Severity::Medium
                };
                anomalies.push(AnomalyPoint {
                    timestamp: ts,
                    value,
                    score: z,
                    severity,
                    description: format!("Statistical anomaly detected (z-score: {:.2})", z),
                });
            }
        }
        Ok(anomalies)
    }

    /// Artifact lookup: memory first, then the durable cache. Safe to
    /// race; artifacts are immutable once trained.
    fn artifact(&self, key: &ModelKey) -> Result<Arc<AnomalyArtifact>> {
        if let Some(artifact) = self.artifacts.read().get(key) {
            return Ok(artifact.clone());
        }

        match self.store.load::<AnomalyArtifact>(key, ArtifactClass::Anomaly)? {
            Some(artifact) => {
                let artifact = Arc::new(artifact);
                self.artifacts.write().insert(key.clone(), artifact.clone());
                self.ready.store(true, Ordering::SeqCst);
                Ok(artifact)
            }
            None => Err(AnalyticsError::model_unavailable(key.to_string())),
        }
    }

    /// Every key this manager knows about: resident artifacts plus
    /// everything persisted under the cache root.
    pub fn known_keys(&self) -> Result<Vec<ModelKey>> {
        let mut keys: Vec<ModelKey> = self.artifacts.read().keys().cloned().collect();
        keys.extend(self.store.list(ArtifactClass::Anomaly)?);
        keys.sort_by(|a, b| a.file_stem().cmp(&b.file_stem()));
        keys.dedup();
        Ok(keys)
    }

    /// Re-train every known key with fresh data supplied by the caller;
    /// same partial-failure and cancellation discipline as the forecast
    /// sweep.
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
                    .parse::<AnomalyMethod>()
                    .and_then(|method| {
                        let table = fetch(key)?;
                        self.train(&table, &key.entity_id, &key.metric, method)
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
            "anomaly retrain sweep: {} ok, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
