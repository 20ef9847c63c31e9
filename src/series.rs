/// Metric time series primitives shared across the analytics engine:
/// single-metric series for model training and multi-metric tables for
/// insight generation.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single observation of one metric. Gaps in a series are represented
/// as explicit NaN values, never as silent zeros.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered sequence of observations for one (entity, metric) pair.
///
/// Construction restores the strictly-increasing timestamp invariant:
/// points are sorted ascending and duplicate timestamps are collapsed
/// (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub entity_id: String,
    pub metric: String,
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new<E, M>(entity_id: E, metric: M, mut points: Vec<MetricPoint>) -> Self
    where
        E: Into<String>,
        M: Into<String>,
    {
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by(|next, prev| {
            if next.timestamp == prev.timestamp {
                prev.value = next.value;
                true
            } else {
                false
            }
        });
        Self {
            entity_id: entity_id.into(),
            metric: metric.into(),
            points,
        }
    }

    pub fn empty<E, M>(entity_id: E, metric: M) -> Self
    where
        E: Into<String>,
        M: Into<String>,
    {
        Self::new(entity_id, metric, Vec::new())
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.points.iter().map(|p| p.timestamp)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// Restrict the series to `[start, end]`, keeping at most `limit`
    /// oldest points (ascending order is preserved).
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> Self {
        let points = self
            .points
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .take(limit)
            .copied()
            .collect();
        Self {
            entity_id: self.entity_id.clone(),
            metric: self.metric.clone(),
            points,
        }
    }
}

/// Timestamp-aligned table of several metrics for one entity (or an
/// aggregate across entities). Column order is insertion order, which
/// keeps insight output deterministic.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: IndexMap<String, Vec<f64>>,
}

impl MetricTable {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: IndexMap::new(),
        }
    }

    /// Add a metric column. The column must be as long as the timestamp
    /// axis; NaN marks a missing observation for that metric.
    pub fn insert_column<S: Into<String>>(&mut self, metric: S, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.timestamps.len());
        self.columns.insert(metric.into(), values);
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column(&self, metric: &str) -> Option<&[f64]> {
        self.columns.get(metric).map(|v| v.as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.columns.is_empty()
    }

    /// Non-NaN values of one column, paired with their timestamps.
    pub fn observed(&self, metric: &str) -> Vec<(DateTime<Utc>, f64)> {
        match self.columns.get(metric) {
            Some(values) => self
                .timestamps
                .iter()
                .zip(values.iter())
                .filter(|(_, v)| !v.is_nan())
                .map(|(t, v)| (*t, *v))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_series_sorts_and_deduplicates() {
        let series = MetricSeries::new(
            "moonbeam",
            "tvl",
            vec![
                MetricPoint::new(ts(3), 30.0),
                MetricPoint::new(ts(1), 10.0),
                MetricPoint::new(ts(2), 20.0),
                MetricPoint::new(ts(2), 25.0),
            ],
        );

        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![10.0, 25.0, 30.0]);
        let stamps: Vec<_> = series.timestamps().collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_series_window_respects_limit() {
        let points = (1..=10).map(|d| MetricPoint::new(ts(d), d as f64)).collect();
        let series = MetricSeries::new("acala", "transactions", points);

        let windowed = series.window(ts(2), ts(9), 3);
        let values: Vec<f64> = windowed.values().collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_table_observed_skips_nan() {
        let mut table = MetricTable::new(vec![ts(1), ts(2), ts(3)]);
        table.insert_column("tvl", vec![1.0, f64::NAN, 3.0]);

        let observed = table.observed("tvl");
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[1].1, 3.0);
        assert!(table.observed("users").is_empty());
    }
}
