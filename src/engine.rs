use tracing::{error, info};

use crate::backend::{build_backend, MetricBackend};
use crate::config::BackendConfig;
use crate::metrics::{self, QueryTimer};
use crate::models::{MetricMergedResult, MetricQuery};
use crate::{QueryEngineError, Result};

/// Entry point for callers: one active backend per engine.
pub struct QueryEngine {
    backend: Box<dyn MetricBackend>,
}

impl QueryEngine {
    pub fn new(backend: Box<dyn MetricBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let backend = build_backend(config)?;
        info!(
            "Query engine using {} with {} server(s)",
            backend.name(),
            config.servers().len()
        );
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult> {
        let backend = self.backend.name();
        let _timer = QueryTimer::new(backend);
        info!(
            "Querying {} table={} fields={:?}",
            backend, query.table, query.fields
        );

        match self.backend.query(query).await {
            Ok(result) => {
                info!("{} query returned {} rows", backend, result.data.len());
                Ok(result)
            }
            Err(e) => {
                error!("{} query failed: {}", backend, e);
                metrics::record_failure(backend, &e);
                Err(e)
            }
        }
    }

    /// Decodes a JSON query, runs it and encodes the result.
    pub async fn query_json(&self, document: &str) -> Result<String> {
        let query: MetricQuery = serde_json::from_str(document).map_err(|e| {
            QueryEngineError::Validation(format!("malformed query document: {}", e))
        })?;
        self.query(&query).await?.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticBackend {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MetricBackend for StaticBackend {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.fields.is_empty() {
                return Err(QueryEngineError::Validation("at least one field is required".into()));
            }
            Ok(MetricMergedResult {
                columns: vec!["timestamp".into(), "cpu_max".into()],
                data: vec![vec![json!(0), json!(1.5)]],
            })
        }
    }

    fn engine() -> (QueryEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = QueryEngine::new(Box::new(StaticBackend {
            calls: calls.clone(),
        }));
        (engine, calls)
    }

    #[tokio::test]
    async fn test_query_json_round_trip() {
        let (engine, calls) = engine();
        let output = engine
            .query_json(r#"{"table": "k8s", "startTime": 0, "fields": ["max(cpu)"]}"#)
            .await
            .unwrap();
        assert_eq!(output, r#"{"columns":["timestamp","cpu_max"],"data":[[0,1.5]]}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_document_is_client_error() {
        let (engine, calls) = engine();
        let err = engine.query_json("{not json").await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let (engine, _) = engine();
        let before = metrics::QUERY_FAILURES
            .with_label_values(&["static", "validation"])
            .get();
        let query = MetricQuery {
            table: "k8s".into(),
            start_time: Some(0),
            ..Default::default()
        };
        assert!(engine.query(&query).await.is_err());
        assert_eq!(
            metrics::QUERY_FAILURES
                .with_label_values(&["static", "validation"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_from_config_rejects_empty_servers() {
        let config = BackendConfig::from_json(r#"{"thanos": {"servers": []}}"#);
        let result = config.and_then(|c| QueryEngine::from_config(&c));
        assert!(matches!(result, Err(QueryEngineError::Configuration(_))));
    }
}
