use thiserror::Error;

use crate::cache::CacheStoreError;

/// Failures while bringing up the process: listeners, pools, backends.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database {stage} failed: {source}")]
    Database {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("cache backend unavailable: {0}")]
    Cache(#[from] CacheStoreError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn database(stage: &'static str, source: sqlx::Error) -> Self {
        Self::Database { stage, source }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
