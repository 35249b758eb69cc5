use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::{ensure_success, http_client, with_auth};
use crate::config::ServerEntry;
use crate::{QueryEngineError, Result};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: usize,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One tag combination of one statement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

#[derive(Clone)]
pub struct InfluxClient {
    http: reqwest::Client,
    server: ServerEntry,
}

impl InfluxClient {
    pub fn new(server: ServerEntry) -> Result<Self> {
        Ok(Self {
            http: http_client(&server)?,
            server,
        })
    }

    pub fn address(&self) -> &str {
        &self.server.address
    }

    /// Runs `;` separated statements against `database`. Any statement
    /// error fails the whole call.
    pub async fn query(&self, database: &str, sql: &str) -> Result<Vec<StatementResult>> {
        debug!("influxdb {} db={} q={}", self.server.address, database, sql);

        let request = self
            .http
            .get(format!("{}/query", self.server.base_url()))
            .query(&[("db", database), ("q", sql), ("epoch", "ms")]);
        let response = with_auth(request, &self.server).send().await?;
        let response = ensure_success(response, "influxdb").await?;
        let body: QueryResponse = response.json().await?;

        if let Some(error) = body.error {
            return Err(QueryEngineError::Backend(format!("influxdb: {}", error)));
        }
        if let Some(error) = body.results.iter().find_map(|r| r.error.as_ref()) {
            return Err(QueryEngineError::Backend(format!("influxdb: {}", error)));
        }
        Ok(body.results)
    }
}
