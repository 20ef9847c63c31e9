/// Feature engineering pipeline for metric time series.
///
/// Turns a raw (timestamp, value) series into a model-ready feature table:
/// - gap filling (forward / backward / linear interpolation)
/// - calendar features derived from the timestamp
/// - lag features at offsets {1, 7, 30}
/// - trailing rolling mean/std over {7, 7, 30} day windows
///
/// Rows whose lag features are undefined (the first 30 retained rows) are
/// dropped rather than zero-filled, so every emitted row is fully
/// populated.
use crate::error::{AnalyticsError, Result};
use crate::series::MetricSeries;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lag offsets, in observations, applied to the filled value series.
pub const LAG_OFFSETS: [usize; 3] = [1, 7, 30];

/// Engineered feature columns, in table order. The target column
/// (`value`) is carried separately.
pub const FEATURE_COLUMNS: [&str; 12] = [
    "hour",
    "day_of_week",
    "day_of_month",
    "month",
    "quarter",
    "is_weekend",
    "lag_1",
    "lag_7",
    "lag_30",
    "rolling_mean_7",
    "rolling_std_7",
    "rolling_mean_30",
];

/// Gap-fill strategy for missing values in the raw series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    Forward,
    Backward,
    Interpolate,
}

impl FillMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillMethod::Forward => "forward",
            FillMethod::Backward => "backward",
            FillMethod::Interpolate => "interpolate",
        }
    }
}

impl FromStr for FillMethod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(FillMethod::Forward),
            "backward" => Ok(FillMethod::Backward),
            "interpolate" => Ok(FillMethod::Interpolate),
            other => Err(AnalyticsError::invalid_parameter(format!(
                "unknown fill method '{}' (expected forward, backward or interpolate)",
                other
            ))),
        }
    }
}

/// Feature table derived from a metric series: one fully-populated row
/// per retained timestamp, ordered ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn empty() -> Self {
        Self {
            timestamps: Vec::new(),
            values: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Assemble a table from pre-computed parts. Callers supplying their
    /// own scoring windows use this; lengths and row widths must agree.
    pub fn from_parts(
        timestamps: Vec<DateTime<Utc>>,
        values: Vec<f64>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if timestamps.len() != values.len() || timestamps.len() != rows.len() {
            return Err(AnalyticsError::invalid_parameter(
                "feature table parts must have matching lengths",
            ));
        }
        if rows.iter().any(|row| row.len() != FEATURE_COLUMNS.len()) {
            return Err(AnalyticsError::invalid_parameter(format!(
                "feature rows must have {} columns",
                FEATURE_COLUMNS.len()
            )));
        }
        Ok(Self {
            timestamps,
            values,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COLUMNS.len()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Raw target column, aligned with `rows()`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Engineered feature rows in `FEATURE_COLUMNS` order.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Rows at or after `cutoff`. Used to score only the recent part of
    /// a window that was derived with extra leading context for its lag
    /// features.
    pub fn since(&self, cutoff: DateTime<Utc>) -> FeatureTable {
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        let mut rows = Vec::new();
        for i in 0..self.timestamps.len() {
            if self.timestamps[i] >= cutoff {
                timestamps.push(self.timestamps[i]);
                values.push(self.values[i]);
                rows.push(self.rows[i].clone());
            }
        }
        FeatureTable {
            timestamps,
            values,
            rows,
        }
    }
}

/// Stateless derivation pipeline; pure function of its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeaturePipeline;

impl FeaturePipeline {
    pub fn new() -> Self {
        Self
    }

    /// Derive the feature table for `series` using `fill` for gaps.
    ///
    /// An empty input yields an empty table, not an error. Output rows
    /// start at the 31st retained observation (the longest lag).
    pub fn derive(&self, series: &MetricSeries, fill: FillMethod) -> Result<FeatureTable> {
        if series.is_empty() {
            return Ok(FeatureTable::empty());
        }

        // MetricSeries construction already orders points, but the
        // contract of this step is explicit ascending order.
        let mut points: Vec<(DateTime<Utc>, f64)> =
            series.points().iter().map(|p| (p.timestamp, p.value)).collect();
        points.sort_by_key(|(t, _)| *t);

        let mut values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        fill_gaps(&mut values, fill);

        // Rows still undefined after filling (e.g. a leading gap under
        // forward fill) are dropped together with their timestamps.
        let retained: Vec<(DateTime<Utc>, f64)> = points
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| !v.is_nan())
            .map(|((t, _), v)| (*t, *v))
            .collect();

        let max_lag = *LAG_OFFSETS.iter().max().unwrap_or(&0);
        if retained.len() <= max_lag {
            return Ok(FeatureTable::empty());
        }

        let filled: Vec<f64> = retained.iter().map(|(_, v)| *v).collect();

        let mut timestamps = Vec::with_capacity(retained.len() - max_lag);
        let mut out_values = Vec::with_capacity(retained.len() - max_lag);
        let mut rows = Vec::with_capacity(retained.len() - max_lag);

        for i in max_lag..retained.len() {
            let (ts, value) = retained[i];
            let calendar = calendar_features(ts);

            let mut row = Vec::with_capacity(FEATURE_COLUMNS.len());
            row.extend_from_slice(&calendar);
            for lag in LAG_OFFSETS {
                row.push(filled[i - lag]);
            }
            row.push(rolling_mean(&filled, i, 7));
            row.push(rolling_std(&filled, i, 7));
            row.push(rolling_mean(&filled, i, 30));

            timestamps.push(ts);
            out_values.push(value);
            rows.push(row);
        }

        Ok(FeatureTable {
            timestamps,
            values: out_values,
            rows,
        })
    }
}

/// Calendar decomposition of a timestamp, in `FEATURE_COLUMNS` order
/// (the first six columns). Shared with forecast feature synthesis.
pub(crate) fn calendar_features(ts: DateTime<Utc>) -> [f64; 6] {
    let day_of_week = ts.weekday().num_days_from_monday();
    [
        ts.hour() as f64,
        day_of_week as f64,
        ts.day() as f64,
        ts.month() as f64,
        ((ts.month() - 1) / 3 + 1) as f64,
        if day_of_week >= 5 { 1.0 } else { 0.0 },
    ]
}

fn fill_gaps(values: &mut [f64], fill: FillMethod) {
    match fill {
        FillMethod::Forward => {
            let mut last = f64::NAN;
            for v in values.iter_mut() {
                if v.is_nan() {
                    *v = last;
                } else {
                    last = *v;
                }
            }
        }
        FillMethod::Backward => {
            let mut next = f64::NAN;
            for v in values.iter_mut().rev() {
                if v.is_nan() {
                    *v = next;
                } else {
                    next = *v;
                }
            }
        }
        FillMethod::Interpolate => interpolate_gaps(values),
    }
}

/// Linear interpolation by position between the surrounding observed
/// values; runs after the last observation carry it forward, runs before
/// the first remain undefined.
fn interpolate_gaps(values: &mut [f64]) {
    let mut prev: Option<usize> = None;
    let mut i = 0;
    while i < values.len() {
        if !values[i].is_nan() {
            prev = Some(i);
            i += 1;
            continue;
        }

        let gap_start = i;
        while i < values.len() && values[i].is_nan() {
            i += 1;
        }

        match (prev, values.get(i).copied()) {
            (Some(p), Some(next)) => {
                let span = (i - p) as f64;
                let left = values[p];
                for (step, v) in values[gap_start..i].iter_mut().enumerate() {
                    let fraction = (gap_start - p + step) as f64 / span;
                    *v = left + (next - left) * fraction;
                }
            }
            (Some(p), None) => {
                let left = values[p];
                for v in values[gap_start..].iter_mut() {
                    *v = left;
                }
            }
            // Leading gap: no left endpoint, stays undefined.
            (None, _) => {}
        }
    }
}

pub(crate) fn rolling_mean(values: &[f64], end: usize, window: usize) -> f64 {
    let start = end.saturating_sub(window - 1);
    let slice = &values[start..=end];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Trailing sample standard deviation with a minimum window of one
/// observation; a single-observation window yields 0.0 rather than an
/// undefined value.
pub(crate) fn rolling_std(values: &[f64], end: usize, window: usize) -> f64 {
    let start = end.saturating_sub(window - 1);
    let slice = &values[start..=end];
    if slice.len() < 2 {
        return 0.0;
    }
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (slice.len() - 1) as f64;
    var.sqrt()
}
