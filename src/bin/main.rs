use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use parachain_analytics::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "parachain-analytics")]
#[command(about = "Forecasting, anomaly detection and insights over parachain metric CSVs")]
#[command(version)]
struct Cli {
    /// CSV file with one `entity,metric,timestamp,value` row per
    /// observation (RFC 3339 or YYYY-MM-DD timestamps).
    #[arg(short, long)]
    data: PathBuf,

    /// Model cache directory.
    #[arg(short, long, default_value = "models/cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a forecasting model for one entity/metric pair.
    Train {
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        metric: String,
        #[arg(short = 'k', long, default_value = "ensemble")]
        model_kind: String,
    },
    /// Predict future values from a trained model.
    Forecast {
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        metric: String,
        #[arg(short = 'd', long, default_value_t = 7)]
        horizon_days: u32,
        #[arg(short = 'k', long, default_value = "ensemble")]
        model_kind: String,
    },
    /// Train a detector and scan the recent window for anomalies.
    Detect {
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        metric: String,
        #[arg(short, long, default_value_t = 0.05)]
        sensitivity: f64,
        #[arg(short = 'M', long, default_value = "statistical")]
        method: String,
    },
    /// Generate natural-language insights.
    Insights {
        #[arg(short, long)]
        entity: Option<String>,
        /// Analysis window; defaults to the engine's configured range.
        #[arg(short, long)]
        time_range_days: Option<i64>,
        #[arg(short = 'p', long)]
        include_predictions: bool,
    },
    /// Show model readiness.
    Status,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let source = load_csv(&cli.data)
        .with_context(|| format!("failed to load {}", cli.data.display()))?;

    let config = EngineConfig {
        cache_dir: cli.cache_dir.clone(),
        ..EngineConfig::default()
    };
    let engine = AnalyticsEngine::new(config, Arc::new(source))?;

    match cli.command {
        Commands::Train {
            entity,
            metric,
            model_kind,
        } => {
            let kind: ModelKind = model_kind.parse()?;
            let report = engine.train_forecaster(&entity, &metric, kind)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Forecast {
            entity,
            metric,
            horizon_days,
            model_kind,
        } => {
            let kind: ModelKind = model_kind.parse()?;
            let forecast = engine.forecast(&entity, &metric, horizon_days, kind)?;
            println!("{}", serde_json::to_string_pretty(&forecast)?);
        }
        Commands::Detect {
            entity,
            metric,
            sensitivity,
            method,
        } => {
            let method: AnomalyMethod = method.parse()?;
            engine.train_detector(&entity, &metric, method)?;
            let report = engine.detect_anomalies(&entity, &metric, sensitivity, method)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Insights {
            entity,
            time_range_days,
            include_predictions,
        } => {
            let days =
                time_range_days.unwrap_or(engine.config().default_time_range_days);
            let report = engine.generate_insights(entity.as_deref(), days, include_predictions)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let status = engine.model_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Load `entity,metric,timestamp,value` rows. A header line is skipped
/// when present; blank values become explicit gaps.
fn load_csv(path: &std::path::Path) -> anyhow::Result<InMemorySource> {
    let contents = std::fs::read_to_string(path)?;
    let source = InMemorySource::new();
    let mut grouped: std::collections::HashMap<(String, String), Vec<MetricPoint>> =
        std::collections::HashMap::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line_no == 0 && line.to_lowercase().starts_with("entity") {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            bail!("line {}: expected 4 fields, got {}", line_no + 1, fields.len());
        }

        let timestamp = parse_timestamp(fields[2])
            .with_context(|| format!("line {}: bad timestamp '{}'", line_no + 1, fields[2]))?;
        let value = if fields[3].is_empty() {
            f64::NAN
        } else {
            fields[3]
                .parse::<f64>()
                .with_context(|| format!("line {}: bad value '{}'", line_no + 1, fields[3]))?
        };

        grouped
            .entry((fields[0].to_string(), fields[1].to_string()))
            .or_default()
            .push(MetricPoint::new(timestamp, value));
    }

    if grouped.is_empty() {
        bail!("no observations found");
    }
    for ((entity, metric), points) in grouped {
        source.insert(MetricSeries::new(entity, metric, points));
    }
    Ok(source)
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight timestamp")?;
    Ok(midnight.and_utc())
}
