/// Data-access boundary for the source-of-truth metrics store.
///
/// The analytic core never talks to a database directly; callers supply
/// an implementation of `DataSource`. The bundled `InMemorySource`
/// backs tests and the CLI.
use crate::error::Result;
use crate::series::{MetricPoint, MetricSeries};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// External metrics store. Implementations must return series ordered
/// ascending by timestamp with duplicate timestamps removed
/// (`MetricSeries` construction enforces both).
pub trait DataSource: Send + Sync {
    /// Historical observations for one (entity, metric) pair within
    /// `[start, end]`, at most `limit` oldest points.
    fn fetch_series(
        &self,
        entity_id: &str,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<MetricSeries>;

    /// The trailing window used as an anomaly-detection scoring range.
    fn fetch_recent_window(
        &self,
        entity_id: &str,
        metric: &str,
        lookback: Duration,
    ) -> Result<MetricSeries> {
        let end = Utc::now();
        self.fetch_series(entity_id, metric, end - lookback, end, usize::MAX)
    }

    /// Entity identifiers known to the store.
    fn list_entities(&self) -> Result<Vec<String>>;

    /// Metric names known to the store.
    fn list_metrics(&self) -> Result<Vec<String>>;
}

/// In-memory `DataSource` used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemorySource {
    series: RwLock<HashMap<(String, String), Vec<MetricPoint>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, series: MetricSeries) {
        let key = (series.entity_id.clone(), series.metric.clone());
        self.series.write().insert(key, series.points().to_vec());
    }

    pub fn insert_points<E, M>(&self, entity_id: E, metric: M, points: Vec<MetricPoint>)
    where
        E: Into<String>,
        M: Into<String>,
    {
        self.insert(MetricSeries::new(entity_id, metric, points));
    }
}

impl DataSource for InMemorySource {
    fn fetch_series(
        &self,
        entity_id: &str,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<MetricSeries> {
        let guard = self.series.read();
        let points = guard
            .get(&(entity_id.to_string(), metric.to_string()))
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end)
                    .take(limit)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(MetricSeries::new(entity_id, metric, points))
    }

    fn list_entities(&self) -> Result<Vec<String>> {
        let guard = self.series.read();
        let mut entities: Vec<String> = guard.keys().map(|(e, _)| e.clone()).collect();
        entities.sort();
        entities.dedup();
        Ok(entities)
    }

    fn list_metrics(&self) -> Result<Vec<String>> {
        let guard = self.series.read();
        let mut metrics: Vec<String> = guard.keys().map(|(_, m)| m.clone()).collect();
        metrics.sort();
        metrics.dedup();
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn seeded_source() -> InMemorySource {
        let source = InMemorySource::new();
        source.insert_points(
            "moonbeam",
            "tvl",
            (1..=20).map(|d| MetricPoint::new(ts(d), d as f64 * 100.0)).collect(),
        );
        source.insert_points(
            "acala",
            "transactions",
            (1..=5).map(|d| MetricPoint::new(ts(d), d as f64)).collect(),
        );
        source
    }

    #[test]
    fn test_fetch_series_range_and_limit() {
        let source = seeded_source();
        let series = source.fetch_series("moonbeam", "tvl", ts(5), ts(15), 4).unwrap();
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![500.0, 600.0, 700.0, 800.0]);
    }

    #[test]
    fn test_unknown_key_yields_empty_series() {
        let source = seeded_source();
        let series = source
            .fetch_series("unknown", "tvl", ts(1), ts(20), 100)
            .unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_listings_are_sorted_and_deduplicated() {
        let source = seeded_source();
        assert_eq!(source.list_entities().unwrap(), vec!["acala", "moonbeam"]);
        assert_eq!(
            source.list_metrics().unwrap(),
            vec!["transactions", "tvl"]
        );
    }
}
