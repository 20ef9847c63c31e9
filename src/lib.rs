pub mod anomaly;
pub mod cancel;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod features;
pub mod forecast;
pub mod insight;
pub mod ml;
pub mod series;
pub mod store;

pub use anomaly::{
    AnomalyBaseline, AnomalyMethod, AnomalyModelManager, AnomalyPoint, AnomalyReport,
    AnomalyTrainingReport, IsolationForest, Severity,
};
pub use cancel::CancellationToken;
pub use connectors::{DataSource, InMemorySource};
pub use engine::{AnalyticsEngine, EngineConfig, ModelStatus, RetrainSummary, CANONICAL_METRICS};
pub use error::{AnalyticsError, Result};
pub use features::{FeaturePipeline, FeatureTable, FillMethod, FEATURE_COLUMNS, LAG_OFFSETS};
pub use forecast::{
    ArtifactState, Forecast, ForecastModelManager, ForecastPoint, ModelKind, Regressor,
    TrainingReport,
};
pub use insight::{Insight, InsightEngine, InsightEnhancer, InsightKind, InsightReport};
pub use series::{MetricPoint, MetricSeries, MetricTable};
pub use store::{ArtifactClass, ArtifactStore, ModelKey, RetrainReport};

pub mod prelude {
    pub use crate::anomaly::{
        AnomalyBaseline, AnomalyMethod, AnomalyModelManager, AnomalyPoint, AnomalyReport,
        Severity,
    };
    pub use crate::cancel::CancellationToken;
    pub use crate::connectors::{DataSource, InMemorySource};
    pub use crate::engine::{AnalyticsEngine, EngineConfig, ModelStatus, CANONICAL_METRICS};
    pub use crate::error::{AnalyticsError, Result};
    pub use crate::features::{FeaturePipeline, FeatureTable, FillMethod};
    pub use crate::forecast::{Forecast, ForecastModelManager, ForecastPoint, ModelKind, TrainingReport};
    pub use crate::insight::{Insight, InsightEngine, InsightEnhancer, InsightReport};
    pub use crate::series::{MetricPoint, MetricSeries, MetricTable};
    pub use crate::store::{ArtifactStore, ModelKey};
}
