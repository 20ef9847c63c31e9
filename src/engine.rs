/// Central analytics engine coordinating the feature pipeline, the two
/// model managers and the insight engine behind the four logical
/// operations a request-handling layer consumes: forecast, anomaly
/// detection, insight generation and model status. Data access goes
/// through an injected `DataSource`; the engine owns one manager of
/// each kind for its lifetime.
use crate::anomaly::{AnomalyMethod, AnomalyModelManager, AnomalyReport, AnomalyTrainingReport};
use crate::cancel::CancellationToken;
use crate::connectors::DataSource;
use crate::error::{AnalyticsError, Result};
use crate::features::{FeaturePipeline, FeatureTable, FillMethod};
use crate::forecast::{Forecast, ForecastModelManager, ModelKind, TrainingReport};
use crate::insight::{self, Insight, InsightEngine, InsightEnhancer, InsightKind, InsightReport};
use crate::series::MetricTable;
use crate::store::RetrainReport;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Metric columns assembled for insight generation.
pub const CANONICAL_METRICS: [&str; 3] = ["tvl", "transactions", "users"];

/// Engine configuration and defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory of the durable model cache.
    pub cache_dir: PathBuf,
    /// Gap-fill strategy applied before feature derivation.
    pub fill_method: FillMethod,
    /// Upper bound on forecast horizons.
    pub max_horizon_days: u32,
    /// History fetched when training a model.
    pub training_range_days: i64,
    /// Scoring window for anomaly detection.
    pub detection_lookback_days: i64,
    /// Extra leading history fetched with the scoring window so its
    /// rows keep full lag/rolling features.
    pub detection_context_days: i64,
    /// Analysis window for insight generation when the caller gives none.
    pub default_time_range_days: i64,
    /// Maximum points fetched per series.
    pub fetch_limit: usize,
    /// Worker threads available to batch sweeps.
    pub parallel_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("models/cache"),
            fill_method: FillMethod::Forward,
            max_horizon_days: 365,
            training_range_days: 180,
            detection_lookback_days: 7,
            detection_context_days: 45,
            default_time_range_days: 30,
            fetch_limit: 1000,
            parallel_workers: num_cpus::get(),
        }
    }
}

/// Readiness of the two model managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub forecaster_ready: bool,
    pub anomaly_detector_ready: bool,
}

/// Combined result of a full retrain sweep.
#[derive(Debug, Clone, Serialize)]
pub struct RetrainSummary {
    pub forecast: RetrainReport,
    pub anomaly: RetrainReport,
}

pub struct AnalyticsEngine {
    config: EngineConfig,
    pipeline: FeaturePipeline,
    forecaster: ForecastModelManager,
    detector: AnomalyModelManager,
    insights: InsightEngine,
    data: Arc<dyn DataSource>,
}

impl std::fmt::Debug for AnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsEngine")
            .field("config", &self.config)
            .field("forecaster", &self.forecaster)
            .field("detector", &self.detector)
            .field("insights", &self.insights)
            .finish()
    }
}

impl AnalyticsEngine {
    pub fn new(config: EngineConfig, data: Arc<dyn DataSource>) -> Result<Self> {
        Ok(Self {
            forecaster: ForecastModelManager::new(&config.cache_dir)?,
            detector: AnomalyModelManager::new(&config.cache_dir)?,
            insights: InsightEngine::new(),
            pipeline: FeaturePipeline::new(),
            config,
            data,
        })
    }

    /// Install an insight post-processing hook (e.g. an external text
    /// model). Without one, rule-based insights pass through untouched.
    pub fn set_insight_enhancer(&mut self, enhancer: Box<dyn InsightEnhancer>) {
        self.insights = InsightEngine::with_enhancer(enhancer);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn forecaster(&self) -> &ForecastModelManager {
        &self.forecaster
    }

    pub fn detector(&self) -> &AnomalyModelManager {
        &self.detector
    }

    /// Fetch and derive the training table for one (entity, metric).
    fn training_table(&self, entity_id: &str, metric: &str) -> Result<FeatureTable> {
        let end = Utc::now();
        let start = end - Duration::days(self.config.training_range_days);
        let series = self
            .data
            .fetch_series(entity_id, metric, start, end, self.config.fetch_limit)?;
        self.pipeline.derive(&series, self.config.fill_method)
    }

    /// Train (or retrain) a forecaster for the key.
    pub fn train_forecaster(
        &self,
        entity_id: &str,
        metric: &str,
        kind: ModelKind,
    ) -> Result<TrainingReport> {
        let table = self.training_table(entity_id, metric)?;
        self.forecaster.train(&table, entity_id, metric, kind)
    }

    /// Train (or retrain) an anomaly detector for the key.
    pub fn train_detector(
        &self,
        entity_id: &str,
        metric: &str,
        method: AnomalyMethod,
    ) -> Result<AnomalyTrainingReport> {
        let table = self.training_table(entity_id, metric)?;
        self.detector.train(&table, entity_id, metric, method)
    }

    /// Produce a horizon forecast from the trained model for the key.
    pub fn forecast(
        &self,
        entity_id: &str,
        metric: &str,
        horizon_days: u32,
        kind: ModelKind,
    ) -> Result<Forecast> {
        if horizon_days > self.config.max_horizon_days {
            return Err(AnalyticsError::invalid_parameter(format!(
                "horizon {} exceeds the maximum of {} days",
                horizon_days, self.config.max_horizon_days
            )));
        }
        self.forecaster.predict(entity_id, metric, horizon_days, kind)
    }

    /// Score the recent window of a metric against its trained detector.
    /// The window is fetched with extra leading context so every scored
    /// row keeps full lag/rolling features, then trimmed back to the
    /// configured lookback.
    pub fn detect_anomalies(
        &self,
        entity_id: &str,
        metric: &str,
        sensitivity: f64,
        method: AnomalyMethod,
    ) -> Result<AnomalyReport> {
        let lookback = Duration::days(self.config.detection_lookback_days);
        let fetch_span = lookback + Duration::days(self.config.detection_context_days);
        let series = self.data.fetch_recent_window(entity_id, metric, fetch_span)?;
        if series.is_empty() {
            return Err(AnalyticsError::data_source(format!(
                "no recent data for {}:{}",
                entity_id, metric
            )));
        }

        let table = self.pipeline.derive(&series, self.config.fill_method)?;
        let window = table.since(Utc::now() - lookback);
        self.detector
            .detect(entity_id, metric, sensitivity, method, &window)
    }

    /// Generate ranked insights over the canonical metrics. With an
    /// entity the table is entity-scoped and the composite-health rule
    /// applies; without one the table aggregates every known entity by
    /// per-timestamp sum. `include_predictions` appends forecast-derived
    /// observations for keys with a trained ensemble model; untrained
    /// keys are skipped silently.
    pub fn generate_insights(
        &self,
        entity_id: Option<&str>,
        time_range_days: i64,
        include_predictions: bool,
    ) -> Result<InsightReport> {
        if time_range_days <= 0 {
            return Err(AnalyticsError::invalid_parameter(
                "time range must be a positive number of days",
            ));
        }

        let table = self.metric_table(entity_id, time_range_days)?;
        let mut report = self.insights.analyze(&table, entity_id);

        if include_predictions {
            if let Some(entity) = entity_id {
                let extra = self.forecast_insights(entity, &table);
                if !extra.is_empty() {
                    report.insights.extend(extra);
                    report.insights.truncate(insight::MAX_INSIGHTS);
                    report.summary = insight::summarize(&report.insights);
                }
            }
        }
        Ok(report)
    }

    /// Current readiness of both managers.
    pub fn model_status(&self) -> ModelStatus {
        ModelStatus {
            forecaster_ready: self.forecaster.is_ready(),
            anomaly_detector_ready: self.detector.is_ready(),
        }
    }

    /// Re-train every known key of both managers with freshly fetched
    /// data. Per-key failures are reported, never fatal; cancellation is
    /// honored between keys.
    pub fn retrain_all(&self, cancel: &CancellationToken) -> Result<RetrainSummary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_workers)
            .build()
            .map_err(|e| AnalyticsError::computation("retrain", e.to_string()))?;

        pool.install(|| {
            let forecast = self.forecaster.retrain(
                |key| self.training_table(&key.entity_id, &key.metric),
                cancel,
            )?;
            let anomaly = self.detector.retrain(
                |key| self.training_table(&key.entity_id, &key.metric),
                cancel,
            )?;
            Ok(RetrainSummary { forecast, anomaly })
        })
    }

    /// Assemble the canonical-metric table for one entity or, without
    /// one, the per-timestamp sum across all entities.
    fn metric_table(&self, entity_id: Option<&str>, time_range_days: i64) -> Result<MetricTable> {
        let end = Utc::now();
        let start = end - Duration::days(time_range_days);

        let entities = match entity_id {
            Some(entity) => vec![entity.to_string()],
            None => self.data.list_entities()?,
        };

        let mut columns: Vec<(&str, BTreeMap<DateTime<Utc>, f64>)> = Vec::new();
        let mut axis: BTreeSet<DateTime<Utc>> = BTreeSet::new();

        for metric in CANONICAL_METRICS {
            let mut merged: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
            for entity in &entities {
                let series =
                    self.data
                        .fetch_series(entity, metric, start, end, self.config.fetch_limit)?;
                for point in series.points() {
                    if point.value.is_nan() {
                        continue;
                    }
                    *merged.entry(point.timestamp).or_insert(0.0) += point.value;
                }
            }
            axis.extend(merged.keys().copied());
            columns.push((metric, merged));
        }

        let timestamps: Vec<DateTime<Utc>> = axis.into_iter().collect();
        let mut table = MetricTable::new(timestamps.clone());
        for (metric, merged) in columns {
            let values = timestamps
                .iter()
                .map(|ts| merged.get(ts).copied().unwrap_or(f64::NAN))
                .collect();
            table.insert_column(metric, values);
        }
        Ok(table)
    }

    /// Forecast-direction observations for metrics with a trained
    /// ensemble model.
    fn forecast_insights(&self, entity_id: &str, table: &MetricTable) -> Vec<Insight> {
        let mut extra = Vec::new();
        for metric in CANONICAL_METRICS {
            let observed = table.observed(metric);
            let last_observed = match observed.last() {
                Some((_, value)) if value.abs() > f64::EPSILON => *value,
                _ => continue,
            };

            let forecast = match self.forecaster.predict(entity_id, metric, 7, ModelKind::Ensemble)
            {
                Ok(forecast) => forecast,
                Err(e) => {
                    log::debug!(
                        "skipping forecast insight for {}:{}: {}",
                        entity_id,
                        metric,
                        e
                    );
                    continue;
                }
            };
            let Some(endpoint) = forecast.values.last() else {
                continue;
            };

            let change_pct = (endpoint.predicted_value - last_observed) / last_observed * 100.0;
            let direction = if change_pct >= 0.0 { "increase" } else { "decrease" };
            extra.push(Insight {
                kind: InsightKind::Trend,
                text: format!(
                    "{} is forecast to {} by {:.1}% over the next 7 days.",
                    metric.to_uppercase(),
                    direction,
                    change_pct.abs()
                ),
            });
        }
        extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::InMemorySource;
    use crate::series::MetricPoint;

    /// Two entities with 200 days of daily data per canonical metric.
    /// The last three days of moonbeam transactions spike hard.
    fn seeded_source() -> Arc<InMemorySource> {
        let source = InMemorySource::new();
        let base = Utc::now() - Duration::days(200);

        for entity in ["moonbeam", "acala"] {
            for metric in CANONICAL_METRICS {
                let points = (0..200)
                    .map(|i| {
                        let trend = match metric {
                            "tvl" => 1_000_000.0 + 20_000.0 * i as f64,
                            "transactions" => 50_000.0 + 20.0 * (i as f64 * 0.8).sin() * 100.0,
                            _ => 2000.0 + 3.0 * i as f64,
                        };
                        let spike = if metric == "transactions" && entity == "moonbeam" && i >= 197 {
                            2_000_000.0
                        } else {
                            0.0
                        };
                        MetricPoint::new(base + Duration::days(i as i64), trend + spike)
                    })
                    .collect();
                source.insert_points(entity, metric, points);
            }
        }
        Arc::new(source)
    }

    fn engine() -> (AnalyticsEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = AnalyticsEngine::new(config, seeded_source()).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_status_starts_not_ready() {
        let (engine, _dir) = engine();
        let status = engine.model_status();
        assert!(!status.forecaster_ready);
        assert!(!status.anomaly_detector_ready);
    }

    #[test]
    fn test_train_and_forecast_round_trip() {
        let (engine, _dir) = engine();
        let report = engine
            .train_forecaster("moonbeam", "tvl", ModelKind::Linear)
            .unwrap();
        assert!(report.mae.is_finite());

        let forecast = engine
            .forecast("moonbeam", "tvl", 7, ModelKind::Linear)
            .unwrap();
        assert_eq!(forecast.values.len(), 7);
        assert_eq!(forecast.model_kind, ModelKind::Linear);
        assert!(engine.model_status().forecaster_ready);
    }

    #[test]
    fn test_forecast_without_model_fails_cleanly() {
        let (engine, _dir) = engine();
        let err = engine
            .forecast("moonbeam", "tvl", 7, ModelKind::Ensemble)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::ModelUnavailable(_)));
    }

    #[test]
    fn test_horizon_cap_is_enforced() {
        let (engine, _dir) = engine();
        let err = engine
            .forecast("moonbeam", "tvl", 9999, ModelKind::Linear)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter(_)));
    }

    #[test]
    fn test_detect_flags_recent_spike() {
        let (engine, _dir) = engine();
        engine
            .train_detector("moonbeam", "transactions", AnomalyMethod::Statistical)
            .unwrap();

        let report = engine
            .detect_anomalies("moonbeam", "transactions", 0.05, AnomalyMethod::Statistical)
            .unwrap();
        assert!(report.total_points > 0);
        assert!(!report.anomalies.is_empty());
        assert!(report
            .anomalies
            .iter()
            .all(|a| a.description.contains("z-score")));
        assert!(engine.model_status().anomaly_detector_ready);
    }

    #[test]
    fn test_detect_without_data_is_a_source_error() {
        let (engine, _dir) = engine();
        engine
            .train_detector("moonbeam", "tvl", AnomalyMethod::Statistical)
            .unwrap();
        let err = engine
            .detect_anomalies("unknown-chain", "tvl", 0.05, AnomalyMethod::Statistical)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::DataSource(_)));
    }

    #[test]
    fn test_entity_insights() {
        let (engine, _dir) = engine();
        let report = engine.generate_insights(Some("acala"), 30, false).unwrap();
        assert!(report.data_points_analyzed > 0);
        assert_eq!(report.confidence, insight::RULE_CONFIDENCE);
        // TVL half-window means differ by well over the 5% threshold.
        assert!(report
            .insights
            .iter()
            .any(|i| i.kind == InsightKind::Trend && i.text.contains("TVL")));
    }

    #[test]
    fn test_aggregate_insights_cover_all_entities() {
        let (engine, _dir) = engine();
        let report = engine.generate_insights(None, 30, false).unwrap();
        assert!(report.data_points_analyzed > 0);
        assert!(report.insights.iter().all(|i| i.kind != InsightKind::Health));
    }

    #[test]
    fn test_insights_reject_bad_time_range() {
        let (engine, _dir) = engine();
        assert!(matches!(
            engine.generate_insights(None, 0, false).unwrap_err(),
            AnalyticsError::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_prediction_enrichment_uses_trained_models() {
        let (engine, _dir) = engine();
        engine
            .train_forecaster("moonbeam", "tvl", ModelKind::Ensemble)
            .unwrap();

        let report = engine
            .generate_insights(Some("moonbeam"), 30, true)
            .unwrap();
        assert!(report.insights.iter().any(|i| i.text.contains("forecast to")));

        // Without any trained ensemble model the enrichment is skipped
        // silently rather than failing the request.
        let fresh_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: fresh_dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let bare = AnalyticsEngine::new(config, seeded_source()).unwrap();
        let report = bare.generate_insights(Some("moonbeam"), 30, true).unwrap();
        assert!(report.insights.iter().all(|i| !i.text.contains("forecast to")));
    }

    #[test]
    fn test_retrain_all_sweeps_both_managers() {
        let (engine, _dir) = engine();
        engine
            .train_forecaster("moonbeam", "tvl", ModelKind::Linear)
            .unwrap();
        engine
            .train_detector("moonbeam", "transactions", AnomalyMethod::Statistical)
            .unwrap();

        let summary = engine.retrain_all(&CancellationToken::new()).unwrap();
        assert_eq!(summary.forecast.succeeded.len(), 1);
        assert_eq!(summary.anomaly.succeeded.len(), 1);
        assert!(summary.forecast.failed.is_empty());
        assert!(summary.anomaly.failed.is_empty());
    }
}
