/// Rule-based insight engine.
///
/// Derives ranked natural-language observations from a multi-metric
/// table: trend direction, volatility, weekly day-of-week patterns and
/// an entity-scoped composite health score. Insights are recomputed per
/// request and never persisted. An injectable enhancer hook may rewrite
/// the rule-based list (e.g. via an external text model); the default is
/// identity.
use crate::series::MetricTable;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Fixed confidence attached to every report: rule-based, not learned.
pub const RULE_CONFIDENCE: f64 = 0.85;

/// Hard cap on the number of insights per report.
pub const MAX_INSIGHTS: usize = 10;

/// Relative first-half/second-half change (percent) that counts as a
/// trend.
const TREND_THRESHOLD_PCT: f64 = 5.0;

/// Coefficient-of-variation bands (percent) for the volatility rule.
const HIGH_VOLATILITY_CV: f64 = 30.0;
const LOW_VOLATILITY_CV: f64 = 10.0;

/// Minimum observations for the weekly-pattern test.
const WEEKLY_MIN_POINTS: usize = 14;

/// Significance level of the day-of-week ANOVA.
const ANOVA_ALPHA: f64 = 0.05;

/// Composite-health factor thresholds.
const HEALTHY_TVL_GROWTH: f64 = 0.10;
const HEALTHY_TXN_CV: f64 = 0.5;
const HEALTHY_USER_GROWTH: f64 = 0.05;
const STRONG_HEALTH_PCT: f64 = 70.0;
const ATTENTION_HEALTH_PCT: f64 = 30.0;

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// The rule family an insight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Trend,
    Volatility,
    Pattern,
    Health,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub text: String,
}

impl Insight {
    fn new<S: Into<String>>(kind: InsightKind, text: S) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub insights: Vec<Insight>,
    pub summary: String,
    pub confidence: f64,
    pub data_points_analyzed: usize,
    pub generated_at: DateTime<Utc>,
}

/// Optional post-processing hook over the rule-based insight list. An
/// implementation may replace the list wholesale; when no enhancer is
/// installed the list passes through untouched.
pub trait InsightEnhancer: Send + Sync {
    fn enhance(&self, insights: Vec<Insight>) -> Vec<Insight>;
}

pub struct InsightEngine {
    enhancer: Option<Box<dyn InsightEnhancer>>,
}

impl std::fmt::Debug for InsightEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightEngine")
            .field("enhancer", &self.enhancer.is_some())
            .finish()
    }
}

impl Default for InsightEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightEngine {
    pub fn new() -> Self {
        Self { enhancer: None }
    }

    pub fn with_enhancer(enhancer: Box<dyn InsightEnhancer>) -> Self {
        Self {
            enhancer: Some(enhancer),
        }
    }

    /// Run every rule over the table. `entity_id` scopes the composite
    /// health rule; aggregate tables skip it.
    pub fn analyze(&self, table: &MetricTable, entity_id: Option<&str>) -> InsightReport {
        let mut insights = Vec::new();
        insights.extend(trend_insights(table));
        insights.extend(volatility_insights(table));
        insights.extend(pattern_insights(table));
        if let Some(entity) = entity_id {
            insights.extend(health_insights(table, entity));
        }
        insights.truncate(MAX_INSIGHTS);

        if let Some(enhancer) = &self.enhancer {
            insights = enhancer.enhance(insights);
            insights.truncate(MAX_INSIGHTS);
        }

        InsightReport {
            summary: summarize(&insights),
            confidence: RULE_CONFIDENCE,
            data_points_analyzed: table.row_count(),
            generated_at: Utc::now(),
            insights,
        }
    }
}

fn trend_insights(table: &MetricTable) -> Vec<Insight> {
    let mut insights = Vec::new();
    for (metric, _) in table.columns() {
        let values: Vec<f64> = table.observed(metric).iter().map(|(_, v)| *v).collect();
        if values.len() < 7 {
            continue;
        }

        let first_half = mean(&values[..values.len() / 2]);
        let second_half = mean(&values[values.len() / 2..]);
        if first_half.abs() < f64::EPSILON {
            continue;
        }

        let change_pct = (second_half - first_half) / first_half * 100.0;
        if change_pct.abs() > TREND_THRESHOLD_PCT {
            let direction = if change_pct > 0.0 { "increased" } else { "decreased" };
            let momentum = if change_pct > 0.0 { "growth" } else { "decline" };
            insights.push(Insight::new(
                InsightKind::Trend,
                format!(
                    "{} has {} by {:.1}% over the past {} days, indicating {} momentum.",
                    metric.to_uppercase(),
                    direction,
                    change_pct.abs(),
                    table.row_count(),
                    momentum
                ),
            ));
        }
    }
    insights
}

fn volatility_insights(table: &MetricTable) -> Vec<Insight> {
    let mut insights = Vec::new();
    for (metric, _) in table.columns() {
        let values: Vec<f64> = table.observed(metric).iter().map(|(_, v)| *v).collect();
        if values.len() < 7 {
            continue;
        }

        let mean_val = mean(&values);
        let std_val = sample_std(&values);
        // A zero-variance series carries no volatility signal either way.
        if mean_val <= 0.0 || std_val <= 0.0 {
            continue;
        }

        let cv = std_val / mean_val * 100.0;
        if cv > HIGH_VOLATILITY_CV {
            insights.push(Insight::new(
                InsightKind::Volatility,
                format!(
                    "{} shows high volatility ({:.1}% coefficient of variation), suggesting unstable market conditions.",
                    metric.to_uppercase(),
                    cv
                ),
            ));
        } else if cv < LOW_VOLATILITY_CV {
            insights.push(Insight::new(
                InsightKind::Volatility,
                format!(
                    "{} is relatively stable ({:.1}% coefficient of variation), indicating consistent performance.",
                    metric.to_uppercase(),
                    cv
                ),
            ));
        }
    }
    insights
}

fn pattern_insights(table: &MetricTable) -> Vec<Insight> {
    let mut insights = Vec::new();
    for (metric, _) in table.columns() {
        let observed = table.observed(metric);
        if observed.len() < WEEKLY_MIN_POINTS {
            continue;
        }
        if let Some(peak_day) = weekly_peak_day(&observed) {
            insights.push(Insight::new(
                InsightKind::Pattern,
                format!(
                    "{} shows a weekly pattern with peak activity typically on {}s.",
                    metric.to_uppercase(),
                    peak_day
                ),
            ));
        }
    }
    insights
}

/// One-way ANOVA across day-of-week buckets. Returns the name of the
/// peak day when the F-test rejects equal bucket means at `ANOVA_ALPHA`.
fn weekly_peak_day(observed: &[(DateTime<Utc>, f64)]) -> Option<&'static str> {
    let mut buckets: [Vec<f64>; 7] = std::array::from_fn(|_| Vec::new());
    for (ts, value) in observed {
        buckets[ts.weekday().num_days_from_monday() as usize].push(*value);
    }

    let populated: Vec<&Vec<f64>> = buckets.iter().filter(|b| b.len() >= 2).collect();
    let k = populated.len();
    let n: usize = populated.iter().map(|b| b.len()).sum();
    if k < 2 || n <= k {
        return None;
    }

    let grand_mean = populated.iter().flat_map(|b| b.iter()).sum::<f64>() / n as f64;
    let ss_between: f64 = populated
        .iter()
        .map(|b| b.len() as f64 * (mean(b) - grand_mean).powi(2))
        .sum();
    let ss_within: f64 = populated
        .iter()
        .map(|b| {
            let m = mean(b);
            b.iter().map(|v| (v - m).powi(2)).sum::<f64>()
        })
        .sum();

    let significant = if ss_within < 1e-12 {
        ss_between > 1e-12
    } else {
        let f_stat = (ss_between / (k - 1) as f64) / (ss_within / (n - k) as f64);
        match FisherSnedecor::new((k - 1) as f64, (n - k) as f64) {
            Ok(dist) => 1.0 - dist.cdf(f_stat) < ANOVA_ALPHA,
            Err(_) => false,
        }
    };
    if !significant {
        return None;
    }

    buckets
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_empty())
        .max_by(|(_, a), (_, b)| {
            mean(a)
                .partial_cmp(&mean(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(day, _)| DAY_NAMES[day])
}

fn health_insights(table: &MetricTable, entity_id: &str) -> Vec<Insight> {
    let mut score = 0usize;
    let mut factors = 0usize;

    if let Some(growth) = endpoint_growth(table, "tvl") {
        factors += 1;
        if growth > HEALTHY_TVL_GROWTH {
            score += 1;
        }
    }

    let txns: Vec<f64> = table.observed("transactions").iter().map(|(_, v)| *v).collect();
    if txns.len() > 1 {
        factors += 1;
        let mean_val = mean(&txns);
        let cv = if mean_val > 0.0 { sample_std(&txns) / mean_val } else { 1.0 };
        if cv < HEALTHY_TXN_CV {
            score += 1;
        }
    }

    if let Some(growth) = endpoint_growth(table, "users") {
        factors += 1;
        if growth > HEALTHY_USER_GROWTH {
            score += 1;
        }
    }

    if factors == 0 {
        return Vec::new();
    }

    let health_pct = score as f64 / factors as f64 * 100.0;
    if health_pct >= STRONG_HEALTH_PCT {
        vec![Insight::new(
            InsightKind::Health,
            format!(
                "Parachain {} shows strong overall health with {:.0}% of indicators trending positively.",
                entity_id, health_pct
            ),
        )]
    } else if health_pct <= ATTENTION_HEALTH_PCT {
        vec![Insight::new(
            InsightKind::Health,
            format!(
                "Parachain {} requires attention with only {:.0}% of health indicators showing positive trends.",
                entity_id, health_pct
            ),
        )]
    } else {
        Vec::new()
    }
}

/// Relative change between the first and last observation of a column;
/// None when fewer than two observations exist or the start is zero.
fn endpoint_growth(table: &MetricTable, metric: &str) -> Option<f64> {
    let observed = table.observed(metric);
    let first = observed.first()?.1;
    let last = observed.last()?.1;
    if observed.len() < 2 || first.abs() < f64::EPSILON {
        return None;
    }
    Some((last - first) / first)
}

pub(crate) fn summarize(insights: &[Insight]) -> String {
    match insights.len() {
        0 => "No significant insights available at this time.".to_string(),
        1 => insights[0].text.clone(),
        n => {
            let mut summary = format!("Analysis revealed {} key insights: ", n);
            summary.push_str(
                &insights
                    .iter()
                    .take(3)
                    .map(|i| i.text.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            if n > 3 {
                summary.push_str(&format!(", and {} additional observations.", n - 3));
            }
            summary
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn table_with(metric: &str, values: Vec<f64>) -> MetricTable {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps = (0..values.len())
            .map(|i| base + Duration::days(i as i64))
            .collect();
        let mut table = MetricTable::new(timestamps);
        table.insert_column(metric, values);
        table
    }

    #[test]
    fn test_flat_series_emits_no_insights() {
        let table = table_with("tvl", vec![1000.0; 30]);
        let report = InsightEngine::new().analyze(&table, None);
        assert!(report.insights.is_empty());
        assert_eq!(report.summary, "No significant insights available at this time.");
        assert_eq!(report.confidence, RULE_CONFIDENCE);
        assert_eq!(report.data_points_analyzed, 30);
    }

    #[test]
    fn test_flat_series_emits_no_trend_or_volatility_for_entity() {
        let table = table_with("tvl", vec![1000.0; 30]);
        let report = InsightEngine::new().analyze(&table, Some("moonbeam"));
        assert!(report
            .insights
            .iter()
            .all(|i| i.kind != InsightKind::Trend && i.kind != InsightKind::Volatility));
    }

    #[test]
    fn test_rising_series_emits_trend() {
        let values: Vec<f64> = (0..30).map(|i| 1000.0 + 50.0 * i as f64).collect();
        let table = table_with("tvl", values);
        let report = InsightEngine::new().analyze(&table, None);

        let trend: Vec<_> = report
            .insights
            .iter()
            .filter(|i| i.kind == InsightKind::Trend)
            .collect();
        assert_eq!(trend.len(), 1);
        assert!(trend[0].text.contains("TVL has increased"));
        assert!(trend[0].text.contains("growth momentum"));
    }

    #[test]
    fn test_falling_series_emits_decline() {
        let values: Vec<f64> = (0..30).map(|i| 2000.0 - 40.0 * i as f64).collect();
        let table = table_with("transactions", values);
        let report = InsightEngine::new().analyze(&table, None);
        assert!(report
            .insights
            .iter()
            .any(|i| i.text.contains("TRANSACTIONS has decreased")));
    }

    #[test]
    fn test_volatility_bands() {
        // Alternating +-60% around the mean: cv well above 30.
        let noisy: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 400.0 } else { 1600.0 })
            .collect();
        let report = InsightEngine::new().analyze(&table_with("tvl", noisy), None);
        assert!(report.insights.iter().any(|i| i.text.contains("high volatility")));

        // Tiny ripple around a large level: cv below 10, non-zero.
        let calm: Vec<f64> = (0..30)
            .map(|i| 1000.0 + (i as f64 * 0.9).sin())
            .collect();
        let report = InsightEngine::new().analyze(&table_with("tvl", calm), None);
        assert!(report.insights.iter().any(|i| i.text.contains("relatively stable")));
    }

    #[test]
    fn test_weekly_pattern_detects_peak_day() {
        // 2024-01-01 is a Monday; spike every Saturday.
        let values: Vec<f64> = (0..112)
            .map(|i| {
                let weekday = i % 7; // 0 = Monday
                let base = 100.0 + (i as f64 * 0.37).sin() * 2.0;
                if weekday == 5 {
                    base + 500.0
                } else {
                    base
                }
            })
            .collect();
        let table = table_with("transactions", values);
        let report = InsightEngine::new().analyze(&table, None);

        let pattern: Vec<_> = report
            .insights
            .iter()
            .filter(|i| i.kind == InsightKind::Pattern)
            .collect();
        assert_eq!(pattern.len(), 1);
        assert!(pattern[0].text.contains("peak activity typically on Saturdays"));
    }

    #[test]
    fn test_no_pattern_on_short_or_even_series() {
        // Too short for the weekly test.
        let table = table_with("tvl", (0..10).map(|i| i as f64).collect());
        let report = InsightEngine::new().analyze(&table, None);
        assert!(report.insights.iter().all(|i| i.kind != InsightKind::Pattern));

        // Long but featureless: the ANOVA must not fire.
        let table = table_with("tvl", (0..56).map(|i| 500.0 + (i as f64 * 1.3).sin()).collect());
        let report = InsightEngine::new().analyze(&table, None);
        assert!(report.insights.iter().all(|i| i.kind != InsightKind::Pattern));
    }

    #[test]
    fn test_health_strong_and_attention() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..30).map(|i| base + Duration::days(i as i64)).collect();

        // Growing TVL and users, steady transactions: 3/3 factors.
        let mut table = MetricTable::new(timestamps.clone());
        table.insert_column("tvl", (0..30).map(|i| 1000.0 * (1.0 + 0.01 * i as f64)).collect());
        table.insert_column("transactions", vec![5000.0; 30]);
        table.insert_column("users", (0..30).map(|i| 100.0 + i as f64).collect());
        let report = InsightEngine::new().analyze(&table, Some("moonbeam"));
        assert!(report
            .insights
            .iter()
            .any(|i| i.kind == InsightKind::Health && i.text.contains("strong overall health")));

        // Shrinking everything, erratic transactions: 0/3 factors.
        let mut table = MetricTable::new(timestamps);
        table.insert_column("tvl", (0..30).map(|i| 1000.0 - 20.0 * i as f64).collect());
        table.insert_column(
            "transactions",
            (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 5000.0 }).collect(),
        );
        table.insert_column("users", (0..30).map(|i| 500.0 - 10.0 * i as f64).collect());
        let report = InsightEngine::new().analyze(&table, Some("moonbeam"));
        assert!(report
            .insights
            .iter()
            .any(|i| i.kind == InsightKind::Health && i.text.contains("requires attention")));
    }

    #[test]
    fn test_health_skipped_without_entity() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..30).map(|i| base + Duration::days(i as i64)).collect();
        let mut table = MetricTable::new(timestamps);
        table.insert_column("tvl", (0..30).map(|i| 1000.0 * (1.0 + 0.01 * i as f64)).collect());
        table.insert_column("transactions", vec![5000.0; 30]);
        table.insert_column("users", (0..30).map(|i| 100.0 + i as f64).collect());

        let report = InsightEngine::new().analyze(&table, None);
        assert!(report.insights.iter().all(|i| i.kind != InsightKind::Health));
    }

    #[test]
    fn test_summary_shapes() {
        assert_eq!(
            summarize(&[]),
            "No significant insights available at this time."
        );

        let single = vec![Insight::new(InsightKind::Trend, "TVL has increased.")];
        assert_eq!(summarize(&single), "TVL has increased.");

        let many: Vec<Insight> = (0..5)
            .map(|i| Insight::new(InsightKind::Trend, format!("observation {}", i)))
            .collect();
        let summary = summarize(&many);
        assert!(summary.starts_with("Analysis revealed 5 key insights: "));
        assert!(summary.contains("observation 0, observation 1, observation 2"));
        assert!(summary.ends_with(", and 2 additional observations."));
    }

    #[test]
    fn test_insight_order_and_cap() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..112).map(|i| base + Duration::days(i as i64)).collect();
        let mut table = MetricTable::new(timestamps);
        // Trending, volatile, weekly-peaked columns all at once.
        for metric in ["tvl", "transactions", "users"] {
            let values: Vec<f64> = (0..112)
                .map(|i| {
                    let weekday = i % 7;
                    let spike = if weekday == 2 { 3000.0 } else { 0.0 };
                    500.0 + 30.0 * i as f64 + spike + (i as f64 * 0.7).sin() * 5.0
                })
                .collect();
            table.insert_column(metric, values);
        }

        let report = InsightEngine::new().analyze(&table, Some("moonbeam"));
        assert!(report.insights.len() <= MAX_INSIGHTS);

        // Rule families keep their order: trends before volatility
        // before patterns.
        let kinds: Vec<InsightKind> = report.insights.iter().map(|i| i.kind).collect();
        let first_volatility = kinds.iter().position(|k| *k == InsightKind::Volatility);
        let last_trend = kinds.iter().rposition(|k| *k == InsightKind::Trend);
        if let (Some(v), Some(t)) = (first_volatility, last_trend) {
            assert!(t < v);
        }
    }

    struct Uppercaser;

    impl InsightEnhancer for Uppercaser {
        fn enhance(&self, insights: Vec<Insight>) -> Vec<Insight> {
            insights
                .into_iter()
                .map(|i| Insight::new(i.kind, i.text.to_uppercase()))
                .collect()
        }
    }

    #[test]
    fn test_enhancer_hook_rewrites_list() {
        let values: Vec<f64> = (0..30).map(|i| 1000.0 + 50.0 * i as f64).collect();
        let table = table_with("tvl", values);
        let report = InsightEngine::with_enhancer(Box::new(Uppercaser)).analyze(&table, None);
        assert!(!report.insights.is_empty());
        assert!(report.insights.iter().all(|i| i.text == i.text.to_uppercase()));
    }
}
