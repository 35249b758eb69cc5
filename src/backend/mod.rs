pub mod elasticsearch;
pub mod influxdb;
pub mod thanos;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};

use crate::config::{BackendConfig, ServerEntry};
use crate::models::{MetricMergedResult, MetricQuery};
use crate::{QueryEngineError, Result};

pub use elasticsearch::ElasticsearchBackend;
pub use influxdb::InfluxDbBackend;
pub use thanos::ThanosBackend;

/// A storage backend able to answer a [`MetricQuery`].
#[async_trait]
pub trait MetricBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult>;
}

pub fn build_backend(config: &BackendConfig) -> Result<Box<dyn MetricBackend>> {
    config.validate()?;
    Ok(match config {
        BackendConfig::InfluxDb(c) => Box::new(InfluxDbBackend::new(c)?),
        BackendConfig::Elasticsearch(c) => Box::new(ElasticsearchBackend::new(c)?),
        BackendConfig::Thanos(c) => Box::new(ThanosBackend::new(c)?),
    })
}

pub(crate) fn http_client(server: &ServerEntry) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = server.timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| {
        QueryEngineError::Configuration(format!(
            "Failed to build HTTP client for {}: {}",
            server.address, e
        ))
    })
}

pub(crate) fn with_auth(request: RequestBuilder, server: &ServerEntry) -> RequestBuilder {
    match &server.username {
        Some(username) => request.basic_auth(username, server.password.as_ref()),
        None => request,
    }
}

/// Turns non-2xx answers into a backend error carrying the response body.
pub(crate) async fn ensure_success(response: Response, backend: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(QueryEngineError::Backend(format!(
        "{} returned {}: {}",
        backend,
        status,
        body.chars().take(512).collect::<String>()
    )))
}
