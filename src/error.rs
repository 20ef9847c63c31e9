pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient data: {required} rows required, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Computation failed for {key}: {message}")]
    Computation { key: String, message: String },

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalyticsError {
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        AnalyticsError::InvalidParameter(msg.into())
    }

    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        AnalyticsError::InsufficientData { required, actual }
    }

    pub fn model_unavailable<S: Into<String>>(key: S) -> Self {
        AnalyticsError::ModelUnavailable(key.into())
    }

    pub fn computation<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        AnalyticsError::Computation {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn data_source<S: Into<String>>(msg: S) -> Self {
        AnalyticsError::DataSource(msg.into())
    }
}
