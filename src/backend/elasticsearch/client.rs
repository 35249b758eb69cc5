use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::{ensure_success, http_client, with_auth};
use crate::config::ServerEntry;
use crate::{QueryEngineError, Result};

#[derive(Debug, Deserialize)]
struct CatIndex {
    index: String,
}

#[derive(Clone)]
pub struct EsClient {
    http: reqwest::Client,
    server: ServerEntry,
}

impl EsClient {
    pub fn new(server: ServerEntry) -> Result<Self> {
        Ok(Self {
            http: http_client(&server)?,
            server,
        })
    }

    pub fn address(&self) -> &str {
        &self.server.address
    }

    /// Names of all `<table>-*` indices.
    pub async fn list_indices(&self, table: &str) -> Result<Vec<String>> {
        let url = format!("{}/_cat/indices/{}-*", self.server.base_url(), table);
        let request = self
            .http
            .get(url)
            .query(&[("format", "json"), ("h", "index")]);
        let response = with_auth(request, &self.server).send().await?;
        let response = ensure_success(response, "elasticsearch").await?;
        let indices: Vec<CatIndex> = response.json().await?;
        Ok(indices.into_iter().map(|i| i.index).collect())
    }

    pub async fn mappings(&self, indices: &[String]) -> Result<Value> {
        let url = format!("{}/{}/_mapping", self.server.base_url(), indices.join(","));
        let request = self
            .http
            .get(url)
            .query(&[("ignore_unavailable", "true")]);
        let response = with_auth(request, &self.server).send().await?;
        let response = ensure_success(response, "elasticsearch").await?;
        Ok(response.json().await?)
    }

    /// Runs a search and returns its `aggregations` object.
    pub async fn search(&self, indices: &[String], body: &Value) -> Result<Value> {
        debug!("elasticsearch {} search {}: {}", self.server.address, indices.join(","), body);

        let url = format!("{}/{}/_search", self.server.base_url(), indices.join(","));
        let request = self
            .http
            .post(url)
            .query(&[("ignore_unavailable", "true")])
            .json(body);
        let response = with_auth(request, &self.server).send().await?;
        let response = ensure_success(response, "elasticsearch").await?;
        let mut answer: Value = response.json().await?;

        if let Some(error) = answer.get("error") {
            return Err(QueryEngineError::Backend(format!("elasticsearch: {}", error)));
        }
        Ok(answer
            .get_mut("aggregations")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}
