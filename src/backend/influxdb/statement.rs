use serde_json::Value;

use super::family::{FamilyRegistry, MetricFamily};
use crate::models::{Operator, Order, CLUSTER_CONDITION_KEY};
use crate::query::{AggFunction, AggregatedField, PreparedQuery, TimeBucket};
use crate::{QueryEngineError, Result};

/// Collection interval of project metrics, the width of the first stage.
const PROJECT_SAMPLE_INTERVAL: &str = "60s";

/// Statements sharing one database, sent as a single `;` separated request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub database: String,
    /// Index into the query's fields for each statement, by statement id.
    pub field_indices: Vec<usize>,
    pub statements: Vec<String>,
}

impl Batch {
    pub fn sql(&self) -> String {
        self.statements.join(";")
    }
}

/// Builds one statement per field, grouped into as few batches as possible.
pub fn plan(
    query: &PreparedQuery,
    registry: &FamilyRegistry,
    cluster_fallback: &str,
    project_database: &str,
) -> Result<Vec<Batch>> {
    let cluster_database = match query.find_condition(CLUSTER_CONDITION_KEY, Operator::Eq) {
        Some(condition) => condition
            .value()
            .as_str()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                QueryEngineError::Validation(format!(
                    "{} must be a non-empty string",
                    CLUSTER_CONDITION_KEY
                ))
            })?
            .to_string(),
        None => cluster_fallback.to_string(),
    };

    let mut batches: Vec<Batch> = Vec::new();
    for (index, field) in query.fields.iter().enumerate() {
        let (database, statement) = match registry.lookup(&field.metric) {
            MetricFamily::Cluster => (cluster_database.clone(), cluster_statement(query, field)?),
            MetricFamily::Project => (
                project_database.to_string(),
                project_statement(query, field)?,
            ),
        };

        match batches.iter_mut().find(|b| b.database == database) {
            Some(batch) => {
                batch.field_indices.push(index);
                batch.statements.push(statement);
            }
            None => batches.push(Batch {
                database,
                field_indices: vec![index],
                statements: vec![statement],
            }),
        }
    }
    Ok(batches)
}

fn cluster_statement(query: &PreparedQuery, field: &AggregatedField) -> Result<String> {
    let mut clauses = render_conditions(query, true)?;
    clauses.extend(time_clauses(query));
    let tags: Vec<&str> = query.tags().collect();

    Ok(format!(
        "SELECT {} AS \"value\" FROM {} WHERE {}{}{}",
        aggregate_expr(field)?,
        quote_ident(&field.metric),
        clauses.join(" AND "),
        group_clause(&tags, query.time_bucket().map(TimeBucket::raw)),
        order_clause(query),
    ))
}

/// Sums co-located series per sample interval, then averages those sums.
/// The caller's function only names the column.
fn project_statement(query: &PreparedQuery, field: &AggregatedField) -> Result<String> {
    let sample = TimeBucket::parse(PROJECT_SAMPLE_INTERVAL)?;
    let inner_bucket = match query.time_bucket() {
        Some(bucket) if bucket.as_millis() < sample.as_millis() => bucket.raw(),
        _ => sample.raw(),
    };
    let tags: Vec<&str> = query.tags().collect();

    let mut inner_clauses = render_conditions(query, false)?;
    inner_clauses.extend(time_clauses(query));
    let inner = format!(
        "SELECT sum(\"value\") AS \"value\" FROM {} WHERE {}{}",
        quote_ident(&field.metric),
        inner_clauses.join(" AND "),
        group_clause(&tags, Some(inner_bucket)),
    );

    Ok(format!(
        "SELECT mean(\"value\") AS \"value\" FROM ({}) WHERE {}{}{}",
        inner,
        time_clauses(query).join(" AND "),
        group_clause(&tags, query.time_bucket().map(TimeBucket::raw)),
        order_clause(query),
    ))
}

fn aggregate_expr(field: &AggregatedField) -> Result<String> {
    Ok(match field.function {
        AggFunction::Avg | AggFunction::Mean => "mean(\"value\")".to_string(),
        AggFunction::Percentile => {
            let percent = field.param.ok_or_else(|| {
                QueryEngineError::Validation(format!(
                    "percentile({}) needs a percent, e.g. percentile({},95)",
                    field.metric, field.metric
                ))
            })?;
            format!("percentile(\"value\", {})", percent)
        }
        other => format!("{}(\"value\")", other),
    })
}

fn render_conditions(query: &PreparedQuery, consume_cluster: bool) -> Result<Vec<String>> {
    let mut clauses = Vec::with_capacity(query.conditions.len());
    for condition in &query.conditions {
        if consume_cluster
            && condition.key() == CLUSTER_CONDITION_KEY
            && condition.operator() == Operator::Eq
        {
            continue;
        }
        let key = quote_ident(condition.key());
        match (condition.operator(), condition.value()) {
            (Operator::In, Value::Array(values)) => {
                if values.is_empty() {
                    return Err(QueryEngineError::Validation(format!(
                        "operator 'in' on '{}' needs at least one value",
                        condition.key()
                    )));
                }
                let alternatives = values
                    .iter()
                    .map(|v| Ok(format!("{} = {}", key, render_literal(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                clauses.push(format!("({})", alternatives.join(" OR ")));
            }
            (Operator::In, _) => {
                return Err(QueryEngineError::Validation(format!(
                    "operator 'in' on '{}' requires an array value",
                    condition.key()
                )))
            }
            (operator, value) => {
                clauses.push(format!("{} {} {}", key, operator, render_literal(value)?));
            }
        }
    }
    Ok(clauses)
}

fn time_clauses(query: &PreparedQuery) -> Vec<String> {
    let mut clauses = vec![format!("time >= {}ms", query.start_time)];
    if let Some(end) = query.end_time {
        clauses.push(format!("time <= {}ms", end));
    }
    clauses
}

fn group_clause(tags: &[&str], bucket: Option<&str>) -> String {
    let mut parts: Vec<String> = tags.iter().map(|t| quote_ident(t)).collect();
    if let Some(bucket) = bucket {
        parts.push(format!("time({})", bucket));
    }
    if parts.is_empty() {
        return String::new();
    }
    let mut clause = format!(" GROUP BY {}", parts.join(","));
    if bucket.is_some() {
        clause.push_str(" fill(none)");
    }
    clause
}

fn order_clause(query: &PreparedQuery) -> &'static str {
    if query.order == Order::Desc && query.order_by == query.timestamp_column() {
        " ORDER BY time DESC"
    } else {
        ""
    }
}

fn render_literal(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(QueryEngineError::Validation(format!(
            "unsupported condition value {}",
            other
        ))),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, MetricQuery};
    use crate::query::{EndTimePolicy, TimeRequirements};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prepare(query: MetricQuery) -> PreparedQuery {
        PreparedQuery::prepare_at(
            &query,
            &TimeRequirements::new(EndTimePolicy::Optional, "time"),
            0,
        )
        .unwrap()
    }

    fn pod_query(fields: &[&str]) -> MetricQuery {
        MetricQuery {
            table: "k8s_pod".into(),
            start_time: Some(1_000),
            end_time: Some(8_000),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            conditions: vec![
                Condition::new(CLUSTER_CONDITION_KEY, Operator::Eq, json!("cls-a")),
                Condition::new("namespace", Operator::Ne, json!("kube-system")),
                Condition::new("pod_name", Operator::In, json!(["p0", "p'1"])),
            ],
            group_by: vec!["timestamp(1s)".into(), "pod_name".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_cluster_statement() {
        let query = prepare(pod_query(&[
            "max(k8s_pod_status_ready)",
            "avg(k8s_pod_cpu_core_used)",
        ]));
        let batches = plan(&query, &FamilyRegistry::default(), "monitor", "projects").unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].database, "cls-a");
        assert_eq!(batches[0].field_indices, vec![0, 1]);
        assert_eq!(
            batches[0].statements[0],
            "SELECT max(\"value\") AS \"value\" FROM \"k8s_pod_status_ready\" \
             WHERE \"namespace\" != 'kube-system' AND (\"pod_name\" = 'p0' OR \"pod_name\" = 'p\\'1') \
             AND time >= 1000ms AND time <= 8000ms \
             GROUP BY \"pod_name\",time(1s) fill(none)"
        );
        assert!(batches[0].statements[1].starts_with("SELECT mean(\"value\")"));
        assert_eq!(batches[0].sql().matches(';').count(), 1);
    }

    #[test]
    fn test_project_two_stage() {
        let mut raw = pod_query(&["mean(project_cpu_core_used)", "max(k8s_pod_status_ready)"]);
        raw.group_by = vec!["timestamp(5m)".into(), "project_name".into()];
        raw.conditions.truncate(1);
        raw.order = Some(Order::Desc);
        let query = prepare(raw);

        let batches = plan(&query, &FamilyRegistry::default(), "monitor", "projects").unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].database, "projects");
        assert_eq!(batches[1].database, "cls-a");
        assert_eq!(
            batches[0].statements[0],
            "SELECT mean(\"value\") AS \"value\" FROM (\
             SELECT sum(\"value\") AS \"value\" FROM \"project_cpu_core_used\" \
             WHERE \"tke_cluster_name\" = 'cls-a' AND time >= 1000ms AND time <= 8000ms \
             GROUP BY \"project_name\",time(60s) fill(none)) \
             WHERE time >= 1000ms AND time <= 8000ms \
             GROUP BY \"project_name\",time(5m) fill(none) ORDER BY time DESC"
        );
    }

    #[test]
    fn test_project_outer_stage_is_always_mean() {
        let mut raw = pod_query(&["max(project_cpu_core_used)"]);
        raw.conditions.clear();
        let query = prepare(raw);

        let batches = plan(&query, &FamilyRegistry::default(), "monitor", "projects").unwrap();
        let statement = &batches[0].statements[0];
        assert!(statement.starts_with(
            "SELECT mean(\"value\") AS \"value\" FROM (SELECT sum(\"value\")"
        ));
        assert!(!statement.contains("max("));
        assert_eq!(query.fields[0].column_name(), "project_cpu_core_used_max");
    }

    #[test]
    fn test_fallback_database_and_percentile() {
        let query = prepare(MetricQuery {
            table: "k8s_node".into(),
            start_time: Some(0),
            fields: vec!["percentile(k8s_node_load,90)".into()],
            ..Default::default()
        });
        let batches = plan(&query, &FamilyRegistry::default(), "monitor", "projects").unwrap();
        assert_eq!(batches[0].database, "monitor");
        assert_eq!(
            batches[0].statements[0],
            "SELECT percentile(\"value\", 90) AS \"value\" FROM \"k8s_node_load\" \
             WHERE time >= 0ms GROUP BY time(60s) fill(none)"
        );
    }

    #[test]
    fn test_percentile_without_percent_rejected() {
        let query = prepare(MetricQuery {
            table: "k8s_node".into(),
            start_time: Some(0),
            fields: vec!["percentile(k8s_node_load)".into()],
            ..Default::default()
        });
        let err = plan(&query, &FamilyRegistry::default(), "monitor", "projects").unwrap_err();
        assert!(err.is_client_error());
    }
}
