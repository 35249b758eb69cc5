use serde_json::{json, Map, Value};

use super::schema::{FieldTypes, MetricTarget, SchemaVariant};
use crate::models::{Condition, Operator, Order};
use crate::query::{AggFunction, AggregatedField, Dimension, PreparedQuery};
use crate::{QueryEngineError, Result};

/// Upper bound of buckets a single `terms` aggregation returns.
const TERMS_SIZE: usize = 10_000;

/// Function name on the wire.
pub fn es_function(function: AggFunction) -> &'static str {
    match function {
        AggFunction::Sum => "sum",
        AggFunction::Avg | AggFunction::Mean => "avg",
        AggFunction::Max => "max",
        AggFunction::Min => "min",
        AggFunction::Count => "value_count",
        AggFunction::Percentile => "percentiles",
    }
}

/// Aggregation name of a field, e.g. `k8s_pod_cpu_max` or
/// `k8s_pod_mem_percentiles_99_9`. Two fields share a name only when they
/// request the same aggregation.
pub fn agg_name(field: &AggregatedField) -> String {
    let base = format!("{}_{}", field.metric, es_function(field.function));
    match field.param {
        Some(percent) => format!("{}_{}", base, percent.to_string().replace('.', "_")),
        None => base,
    }
}

pub struct SearchContext<'a> {
    pub variant: SchemaVariant,
    pub types: &'a FieldTypes,
    pub time_field: &'a str,
}

pub fn build_search(query: &PreparedQuery, ctx: &SearchContext<'_>) -> Result<Value> {
    let (filter, must_not) = build_filters(query, ctx)?;
    let mut body = json!({
        "size": 0,
        "query": {"bool": {"filter": filter, "must_not": must_not}},
    });
    body["aggs"] = Value::Object(build_aggs(query, ctx));
    Ok(body)
}

fn build_filters(
    query: &PreparedQuery,
    ctx: &SearchContext<'_>,
) -> Result<(Vec<Value>, Vec<Value>)> {
    let mut range = Map::new();
    range.insert("gte".into(), json!(query.start_time));
    if let Some(end) = query.end_time {
        range.insert("lte".into(), json!(end));
    }
    range.insert("format".into(), json!("epoch_millis"));

    let mut filter = vec![json!({"range": {ctx.time_field: range}})];
    let mut must_not = Vec::new();
    for condition in &query.conditions {
        let path = ctx.variant.dimension_field(condition.key(), ctx.types);
        match condition.operator() {
            Operator::Ne => must_not.push(json!({"term": {path: condition.value()}})),
            _ => filter.push(condition_filter(&path, condition)?),
        }
    }
    Ok((filter, must_not))
}

fn condition_filter(path: &str, condition: &Condition) -> Result<Value> {
    let value = condition.value();
    let bound = match condition.operator() {
        Operator::Eq | Operator::Ne => return Ok(json!({"term": {path: value}})),
        Operator::In => {
            if !value.is_array() {
                return Err(QueryEngineError::Validation(format!(
                    "operator 'in' on '{}' requires an array value",
                    condition.key()
                )));
            }
            return Ok(json!({"terms": {path: value}}));
        }
        Operator::Gt => "gt",
        Operator::Gte => "gte",
        Operator::Lt => "lt",
        Operator::Lte => "lte",
    };
    Ok(json!({"range": {path: {bound: value}}}))
}

/// Group by entries nest outside in; the one matching the sort key moves to
/// the outermost level so its bucket order drives the result order.
pub fn ordered_dimensions(query: &PreparedQuery) -> Vec<&Dimension> {
    let mut dimensions: Vec<&Dimension> = query.group_by.iter().collect();
    if let Some(ordered) = query.order_dimension() {
        if let Some(position) = dimensions.iter().position(|d| *d == ordered) {
            let dimension = dimensions.remove(position);
            dimensions.insert(0, dimension);
        }
    }
    dimensions
}

fn build_aggs(query: &PreparedQuery, ctx: &SearchContext<'_>) -> Map<String, Value> {
    let mut aggs = metric_aggs(query, ctx);
    let ordered = query.order_dimension();

    for dimension in ordered_dimensions(query).into_iter().rev() {
        let direction = match (Some(dimension) == ordered, query.order) {
            (true, Order::Desc) => "desc",
            _ => "asc",
        };
        let mut agg = match dimension {
            Dimension::Time(bucket) => json!({"date_histogram": {
                "field": ctx.time_field,
                "fixed_interval": bucket.es_interval(),
                "min_doc_count": 1,
                "order": {"_key": direction},
            }}),
            Dimension::Tag(tag) => json!({"terms": {
                "field": ctx.variant.dimension_field(tag, ctx.types),
                "size": TERMS_SIZE,
                "order": {"_key": direction},
            }}),
        };
        agg["aggs"] = Value::Object(aggs);

        aggs = Map::new();
        aggs.insert(dimension.name().to_string(), agg);
    }
    aggs
}

/// One sub-aggregation per distinct wire name; fields that map to the same
/// name (`avg(x)` and `mean(x)`) share it.
fn metric_aggs(query: &PreparedQuery, ctx: &SearchContext<'_>) -> Map<String, Value> {
    let mut aggs = Map::new();
    for field in &query.fields {
        let name = agg_name(field);
        if aggs.contains_key(&name) {
            continue;
        }
        let agg = match ctx.variant.metric_target(&field.metric, ctx.types) {
            MetricTarget::Field(path) => metric_agg(field, &path),
            MetricTarget::Named {
                name_field,
                metric,
                value_field,
            } => json!({
                "filter": {"term": {name_field: metric}},
                "aggs": {name.clone(): metric_agg(field, &value_field)},
            }),
        };
        aggs.insert(name, agg);
    }
    aggs
}

fn metric_agg(field: &AggregatedField, path: &str) -> Value {
    let mut params = json!({"field": path});
    if let Some(percent) = field.param {
        params["percents"] = json!([percent]);
    }
    json!({es_function(field.function): params})
}
