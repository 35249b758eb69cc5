//! Thanos / Prometheus backend.
//!
//! Only metric names and label matchers are pushed down: one range query
//! fetches every requested metric, and its matrix is scattered into a
//! dense grid of time slots by tag combination.

pub mod client;
pub mod grid;
pub mod selector;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

pub use client::{MatrixSeries, RangeQuery, ThanosClient};
pub use grid::Grid;

use crate::backend::MetricBackend;
use crate::config::ThanosConfig;
use crate::merge::{self, ColumnLayout};
use crate::models::{MetricMergedResult, MetricQuery};
use crate::pool::ClientPool;
use crate::query::{EndTimePolicy, PreparedQuery, TimeBucket, TimeRequirements, TIMESTAMP_DIMENSION};
use crate::{QueryEngineError, Result};

pub struct ThanosBackend {
    pool: ClientPool<ThanosClient>,
    deadline: Duration,
}

impl ThanosBackend {
    pub fn new(config: &ThanosConfig) -> Result<Self> {
        let clients = config
            .servers
            .iter()
            .cloned()
            .map(ThanosClient::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pool: ClientPool::new("thanos", clients, config.failover.policy())?,
            deadline: Duration::from_secs(config.deadline_secs),
        })
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn requirements() -> TimeRequirements {
        TimeRequirements::new(EndTimePolicy::Required, TIMESTAMP_DIMENSION)
    }

    pub fn pool(&self) -> &ClientPool<ThanosClient> {
        &self.pool
    }
}

#[async_trait]
impl MetricBackend for ThanosBackend {
    fn name(&self) -> &'static str {
        "thanos"
    }

    async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult> {
        let prepared = PreparedQuery::prepare(query, &Self::requirements())?;
        let end_ms = prepared
            .end_time
            .ok_or_else(|| QueryEngineError::Validation("endTime is required".into()))?;
        let step_ms = prepared
            .time_bucket()
            .map(TimeBucket::as_millis)
            .unwrap_or_else(|| TimeBucket::default().as_millis());

        let range = RangeQuery {
            selector: selector::build_selector(&prepared),
            start_ms: prepared.start_time,
            end_ms,
            step_ms,
        };
        let deadline = self.deadline;
        let matrix = self
            .pool
            .execute(|client| {
                let range = range.clone();
                async move { client.query_range(&range, deadline).await }
            })
            .await?;
        if matrix.is_empty() {
            return Ok(MetricMergedResult::empty());
        }

        let layout = ColumnLayout::for_query(&prepared);
        let mut grid = Grid::new(&layout, &matrix, prepared.start_time, end_ms, step_ms);
        for series in &matrix {
            grid.scatter(&prepared, series);
        }
        let rows = grid.into_rows();
        debug!("thanos scattered {} series into {} rows", matrix.len(), rows.len());

        Ok(merge::finalize(rows, &layout, &prepared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerEntry;
    use crate::models::{Condition, Operator};
    use crate::pool::FailoverStrategy;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(servers: &[&MockServer]) -> ThanosBackend {
        ThanosBackend::new(&ThanosConfig {
            servers: servers.iter().map(|s| ServerEntry::new(s.uri())).collect(),
            deadline_secs: 10,
            failover: FailoverStrategy::RoundRobin,
        })
        .unwrap()
    }

    fn query() -> MetricQuery {
        MetricQuery {
            table: "k8s_pod".into(),
            start_time: Some(0),
            end_time: Some(120_000),
            fields: vec!["max(k8s_pod_cpu)".into(), "mean(k8s_pod_mem)".into()],
            conditions: vec![Condition::new("tke_cluster_name", Operator::Eq, json!("cls-a"))],
            group_by: vec!["timestamp(1m)".into(), "pod_name".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_matrix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            })))
            .mount(&server)
            .await;

        let result = backend(&[&server]).query(&query()).await.unwrap();
        assert_eq!(result, MetricMergedResult::empty());
    }

    #[tokio::test]
    async fn test_matrix_to_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .and(query_param(
                "query",
                r#"{__name__=~"k8s_pod_cpu|k8s_pod_mem",cluster_id="cls-a"}"#,
            ))
            .and(query_param("step", "60.000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": [
                    {"metric": {"__name__": "k8s_pod_mem", "pod_name": "p1"},
                     "values": [[60, "512"], [120, "640"]]},
                    {"metric": {"__name__": "k8s_pod_cpu", "pod_name": "p1"},
                     "values": [[60, "0.5"], [120, "0.75"]]},
                    {"metric": {"__name__": "k8s_pod_cpu", "pod_name": "p0"},
                     "values": [[120, "0.25"]]}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = backend(&[&server]).query(&query()).await.unwrap();
        assert_eq!(
            result.columns,
            vec!["timestamp(1m)", "k8s_pod_cpu_max", "k8s_pod_mem_mean", "pod_name"]
        );
        assert_eq!(
            result.data,
            vec![
                vec![json!(60_000), json!(0.5), json!(512.0), json!("p1")],
                vec![json!(120_000), json!(0.25), serde_json::Value::Null, json!("p0")],
                vec![json!(120_000), json!(0.75), json!(640.0), json!("p1")],
            ]
        );
    }

    #[tokio::test]
    async fn test_end_time_required() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut request = query();
        request.end_time = None;
        let err = backend(&[&server]).query(&request).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[test_log::test(tokio::test)]
    async fn test_deadline_triggers_failover() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&slow)
            .await;
        let fast = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            })))
            .expect(1)
            .mount(&fast)
            .await;

        let backend = backend(&[&slow, &fast]).with_deadline(Duration::from_millis(50));
        let result = backend.query(&query()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(backend.pool().current_index(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exhausts_single_server() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&slow)
            .await;

        let backend = backend(&[&slow]).with_deadline(Duration::from_millis(50));
        let err = backend.query(&query()).await.unwrap_err();
        assert!(matches!(
            err,
            QueryEngineError::BackendUnavailable(msg) if msg.contains("did not answer")
        ));
    }
}
