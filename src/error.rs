use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryEngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryEngineError {
    /// Errors caused by the request itself; the caller should see a bad request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueryEngineError::Validation(_) | QueryEngineError::Serialization(_)
        )
    }

    /// Whether another client of the same pool may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryEngineError::Backend(_) | QueryEngineError::Timeout(_)
        )
    }

    /// Short label used for the failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryEngineError::Validation(_) => "validation",
            QueryEngineError::BackendUnavailable(_) => "unavailable",
            QueryEngineError::Backend(_) => "backend",
            QueryEngineError::Timeout(_) => "timeout",
            QueryEngineError::Serialization(_) => "serialization",
            QueryEngineError::Configuration(_) => "configuration",
            QueryEngineError::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for QueryEngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryEngineError::Timeout(err.to_string())
        } else {
            QueryEngineError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueryEngineError {
    fn from(err: serde_json::Error) -> Self {
        QueryEngineError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryEngineError>;
