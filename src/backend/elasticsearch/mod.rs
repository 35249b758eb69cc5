//! Elasticsearch backend.
//!
//! Data lives in daily `<table>-YYYY.MM.DD` indices. A query resolves the
//! indices covering its window, reads their merged mapping to find
//! aggregatable field paths, then runs one search whose nested bucket
//! aggregations mirror the group by list.

pub mod bucket;
pub mod client;
pub mod dsl;
pub mod index;
pub mod schema;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub use client::EsClient;
pub use schema::SchemaVariant;

use crate::backend::MetricBackend;
use crate::config::ElasticsearchConfig;
use crate::merge::{self, ColumnLayout, RowMerger};
use crate::models::{MetricMergedResult, MetricQuery};
use crate::pool::ClientPool;
use crate::query::{EndTimePolicy, PreparedQuery, TimeRequirements, TIMESTAMP_DIMENSION};
use crate::Result;

use bucket::FlatRow;
use dsl::SearchContext;

pub struct ElasticsearchBackend {
    pool: ClientPool<EsClient>,
    schema: SchemaVariant,
    time_field: String,
}

impl ElasticsearchBackend {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let clients = config
            .servers
            .iter()
            .cloned()
            .map(EsClient::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pool: ClientPool::new("elasticsearch", clients, config.failover.policy())?,
            schema: config.schema,
            time_field: config.time_field.clone(),
        })
    }

    pub fn requirements(&self) -> TimeRequirements {
        TimeRequirements::new(EndTimePolicy::DefaultNow, self.time_field.clone())
    }

    pub fn pool(&self) -> &ClientPool<EsClient> {
        &self.pool
    }

    /// Index resolution, mapping lookup and search against one server.
    async fn search(&self, client: EsClient, query: &PreparedQuery) -> Result<Value> {
        let end_time = query.end_time.unwrap_or(query.start_time);
        let available = client.list_indices(&query.table).await?;
        let indices = index::resolve_indices(&available, &query.table, query.start_time, end_time)?;
        debug!("elasticsearch {} resolved indices {:?}", client.address(), indices);

        let mapping = client.mappings(&indices).await?;
        let types = schema::field_types(self.schema, &mapping);
        let body = dsl::build_search(
            query,
            &SearchContext {
                variant: self.schema,
                types: &types,
                time_field: &self.time_field,
            },
        )?;
        client.search(&indices, &body).await
    }
}

#[async_trait]
impl MetricBackend for ElasticsearchBackend {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn query(&self, query: &MetricQuery) -> Result<MetricMergedResult> {
        let prepared = PreparedQuery::prepare(query, &self.requirements())?;
        let aggregations = self
            .pool
            .execute(|client| self.search(client, &prepared))
            .await?;

        let levels: Vec<&str> = dsl::ordered_dimensions(&prepared)
            .into_iter()
            .map(|d| d.name())
            .collect();
        let mut metric_names: Vec<String> = prepared.fields.iter().map(dsl::agg_name).collect();
        metric_names.sort();
        metric_names.dedup();
        let rows = bucket::flatten(&aggregations, &levels, &metric_names);
        debug!("elasticsearch returned {} leaf buckets", rows.len());

        let layout = ColumnLayout::for_query(&prepared);
        let mut merger = RowMerger::new(&layout);
        for row in &rows {
            merge_row(&mut merger, &layout, &prepared, row);
        }
        Ok(merge::finalize(merger.into_rows(), &layout, &prepared))
    }
}

/// Without a time dimension every row is stamped with the window start.
fn merge_row(
    merger: &mut RowMerger<'_>,
    layout: &ColumnLayout,
    query: &PreparedQuery,
    row: &FlatRow,
) {
    let timestamp = row
        .keys
        .get(TIMESTAMP_DIMENSION)
        .cloned()
        .unwrap_or_else(|| json!(query.start_time));
    let tags: BTreeMap<String, String> = layout
        .tags()
        .iter()
        .filter_map(|tag| row.tag(tag).map(|value| (tag.clone(), value)))
        .collect();

    for (i, field) in query.fields.iter().enumerate() {
        let value = row
            .metrics
            .get(&dsl::agg_name(field))
            .cloned()
            .unwrap_or(Value::Null);
        merger.upsert(&timestamp, &tags, i, value);
    }
}
