use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::backend::{ensure_success, http_client, with_auth};
use crate::config::ServerEntry;
use crate::{QueryEngineError, Result};

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixSeries>,
}

/// One labeled series of a range query; samples are `(seconds, "value")`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatrixSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub selector: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub step_ms: i64,
}

#[derive(Clone)]
pub struct ThanosClient {
    http: reqwest::Client,
    server: ServerEntry,
}

impl ThanosClient {
    pub fn new(server: ServerEntry) -> Result<Self> {
        Ok(Self {
            http: http_client(&server)?,
            server,
        })
    }

    pub fn address(&self) -> &str {
        &self.server.address
    }

    /// Runs one `query_range` call that must complete within `deadline`.
    pub async fn query_range(
        &self,
        query: &RangeQuery,
        deadline: Duration,
    ) -> Result<Vec<MatrixSeries>> {
        debug!("thanos {} query_range {}", self.server.address, query.selector);

        match tokio::time::timeout(deadline, self.send(query, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(QueryEngineError::Timeout(format!(
                "thanos {} did not answer within {:?}",
                self.server.address, deadline
            ))),
        }
    }

    async fn send(&self, query: &RangeQuery, deadline: Duration) -> Result<Vec<MatrixSeries>> {
        let request = self
            .http
            .get(format!("{}/api/v1/query_range", self.server.base_url()))
            .query(&[
                ("query", query.selector.clone()),
                ("start", seconds(query.start_ms)),
                ("end", seconds(query.end_ms)),
                ("step", seconds(query.step_ms)),
                ("timeout", format!("{}s", deadline.as_secs().max(1))),
            ]);
        let response = with_auth(request, &self.server).send().await?;
        let response = ensure_success(response, "thanos").await?;
        let body: QueryRangeResponse = response.json().await?;

        if body.status != "success" {
            return Err(QueryEngineError::Backend(format!(
                "thanos {}: {}",
                body.error_type.unwrap_or_default(),
                body.error.unwrap_or_default()
            )));
        }
        match body.data {
            Some(data) if data.result_type == "matrix" => Ok(data.result),
            Some(data) => Err(QueryEngineError::Backend(format!(
                "thanos returned '{}' instead of a matrix",
                data.result_type
            ))),
            None => Ok(Vec::new()),
        }
    }
}

fn seconds(millis: i64) -> String {
    format!("{:.3}", millis as f64 / 1_000.0)
}
