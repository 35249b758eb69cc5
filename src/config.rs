//! Backend configuration.
//!
//! Exactly one backend is active per deployment. The configuration is
//! either deserialized from a JSON document or assembled from `METRIC_*`
//! environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::elasticsearch::SchemaVariant;
use crate::pool::FailoverStrategy;
use crate::{QueryEngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ServerEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            timeout_secs: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Address with a scheme and without a trailing slash.
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    pub servers: Vec<ServerEntry>,
    /// Used when a query names no cluster.
    #[serde(default = "default_cluster_database")]
    pub cluster_database: String,
    #[serde(default = "default_project_database")]
    pub project_database: String,
    #[serde(default)]
    pub failover: FailoverStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub schema: SchemaVariant,
    #[serde(default = "default_time_field")]
    pub time_field: String,
    #[serde(default)]
    pub failover: FailoverStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThanosConfig {
    pub servers: Vec<ServerEntry>,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default)]
    pub failover: FailoverStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendConfig {
    #[serde(rename = "influxdb")]
    InfluxDb(InfluxDbConfig),
    Elasticsearch(ElasticsearchConfig),
    Thanos(ThanosConfig),
}

fn default_cluster_database() -> String {
    "monitor".to_string()
}

fn default_project_database() -> String {
    "projects".to_string()
}

fn default_time_field() -> String {
    "timestamp".to_string()
}

fn default_deadline_secs() -> u64 {
    10
}

impl BackendConfig {
    pub fn from_json(document: &str) -> Result<Self> {
        let config: BackendConfig = serde_json::from_str(document).map_err(|e| {
            QueryEngineError::Configuration(format!("invalid backend configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `METRIC_*` variables resolved by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = lookup("METRIC_BACKEND").ok_or_else(|| {
            QueryEngineError::Configuration("METRIC_BACKEND is not set".into())
        })?;
        let servers_var = lookup("METRIC_SERVERS").unwrap_or_default();
        let timeout_secs = match lookup("METRIC_TIMEOUT_SECS") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|e| {
                QueryEngineError::Configuration(format!("invalid METRIC_TIMEOUT_SECS: {}", e))
            })?),
            None => None,
        };
        let username = lookup("METRIC_USERNAME");
        let password = lookup("METRIC_PASSWORD");

        let servers: Vec<ServerEntry> = servers_var
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|address| ServerEntry {
                address: address.to_string(),
                username: username.clone(),
                password: password.clone(),
                timeout_secs,
            })
            .collect();

        let config = match backend.as_str() {
            "influxdb" => BackendConfig::InfluxDb(InfluxDbConfig {
                servers,
                cluster_database: lookup("METRIC_INFLUX_DATABASE")
                    .unwrap_or_else(default_cluster_database),
                project_database: default_project_database(),
                failover: FailoverStrategy::default(),
            }),
            "elasticsearch" => {
                let schema = match lookup("METRIC_ES_SCHEMA").as_deref() {
                    None | Some("monitor") => SchemaVariant::Monitor,
                    Some("plain") => SchemaVariant::Plain,
                    Some(other) => {
                        return Err(QueryEngineError::Configuration(format!(
                            "unknown METRIC_ES_SCHEMA '{}'",
                            other
                        )))
                    }
                };
                BackendConfig::Elasticsearch(ElasticsearchConfig {
                    servers,
                    schema,
                    time_field: default_time_field(),
                    failover: FailoverStrategy::default(),
                })
            }
            "thanos" => BackendConfig::Thanos(ThanosConfig {
                servers,
                deadline_secs: default_deadline_secs(),
                failover: FailoverStrategy::default(),
            }),
            other => {
                return Err(QueryEngineError::Configuration(format!(
                    "unknown METRIC_BACKEND '{}'",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::InfluxDb(_) => "influxdb",
            BackendConfig::Elasticsearch(_) => "elasticsearch",
            BackendConfig::Thanos(_) => "thanos",
        }
    }

    pub fn servers(&self) -> &[ServerEntry] {
        match self {
            BackendConfig::InfluxDb(c) => &c.servers,
            BackendConfig::Elasticsearch(c) => &c.servers,
            BackendConfig::Thanos(c) => &c.servers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers().is_empty() {
            return Err(QueryEngineError::Configuration(format!(
                "no {} servers configured",
                self.name()
            )));
        }
        if let Some(empty) = self.servers().iter().find(|s| s.address.trim().is_empty()) {
            return Err(QueryEngineError::Configuration(format!(
                "{} server entry has an empty address: {:?}",
                self.name(),
                empty
            )));
        }
        if let BackendConfig::Thanos(c) = self {
            if c.deadline_secs == 0 {
                return Err(QueryEngineError::Configuration(
                    "thanos deadline_secs must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}
