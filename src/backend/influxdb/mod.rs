//! InfluxDB backend.
//!
//! Each field becomes one InfluxQL statement; statements sharing a database
//! go out in one request. Results come back as one series per field and tag
//! combination and are folded into a single table by [`RowMerger`].

pub mod client;
pub mod family;
pub mod statement;

use async_trait::async_trait;
use tracing::debug;

pub use client::{InfluxClient, Series, StatementResult};
pub use family::{FamilyRegistry, MetricFamily};
pub use statement::Batch;

use crate::backend::MetricBackend;
use crate::config::InfluxDbConfig;
use crate::merge::{self, ColumnLayout, RowMerger};
use crate::models::{MetricMergedResult, MetricQuery};
use crate::pool::ClientPool;
use crate::query::{EndTimePolicy, PreparedQuery, TimeRequirements};
use crate::{QueryEngineError, Result};

pub const TIME_FIELD: &str = "time";

pub struct InfluxDbBackend {
    pool: ClientPool<InfluxClient>,
    registry: FamilyRegistry,
    cluster_database: String,
    project_database: String,
}

impl InfluxDbBackend {
    pub fn new(config: &InfluxDbConfig) -> Result<Self> {
        let clients = config
            .servers
            .iter()
            .cloned()
            .map(InfluxClient::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pool: ClientPool::new("influxdb", clients, config.failover.policy())?,
            registry: FamilyRegistry::default(),
            cluster_database: config.cluster_database.clone(),
            project_database: config.project_database.clone(),
        })
    }

    pub fn with_registry(mut self, registry: FamilyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn requirements() -> TimeRequirements {
        TimeRequirements::new(EndTimePolicy::Optional, TIME_FIELD)
    }

    pub fn pool(&self) -> &ClientPool<InfluxClient> {
        &self.pool
    }
}

#[async_trait]
impl MetricBackend for InfluxDbBackend {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult> {
        let prepared = PreparedQuery::prepare(query, &Self::requirements())?;
        let batches = statement::plan(
            &prepared,
            &self.registry,
            &self.cluster_database,
            &self.project_database,
        )?;

        let layout = ColumnLayout::for_query(&prepared);
        let mut merger = RowMerger::new(&layout);
        for batch in &batches {
            let sql = batch.sql();
            let results = self
                .pool
                .execute(|client| {
                    let database = batch.database.clone();
                    let sql = sql.clone();
                    async move { client.query(&database, &sql).await }
                })
                .await?;
            merge_results(&mut merger, batch, results)?;
        }
        debug!("influxdb merged {} rows from {} batches", merger.len(), batches.len());

        Ok(merge::finalize(merger.into_rows(), &layout, &prepared))
    }
}

/// Writes every sample of a batch into the merger, keyed by timestamp and tags.
pub fn merge_results(
    merger: &mut RowMerger<'_>,
    batch: &Batch,
    results: Vec<StatementResult>,
) -> Result<()> {
    for result in results {
        let field_index = *batch
            .field_indices
            .get(result.statement_id)
            .ok_or_else(|| {
                QueryEngineError::Backend(format!(
                    "influxdb returned unknown statement id {}",
                    result.statement_id
                ))
            })?;

        for series in &result.series {
            let time_column = series.columns.iter().position(|c| c == TIME_FIELD).unwrap_or(0);
            let value_column = series.columns.iter().position(|c| c == "value").unwrap_or(1);
            for row in &series.values {
                let timestamp = row.get(time_column).cloned().unwrap_or_default();
                let value = row.get(value_column).cloned().unwrap_or_default();
                merger.upsert(&timestamp, &series.tags, field_index, value);
            }
        }
    }
    Ok(())
}
