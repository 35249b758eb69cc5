use serde_json::Value;
use tracing::warn;

use crate::models::{Condition, Operator, CLUSTER_CONDITION_KEY};
use crate::query::PreparedQuery;

/// Label carrying the cluster a series was scraped from.
pub const CLUSTER_LABEL: &str = "cluster_id";
pub const NAME_LABEL: &str = "__name__";

pub fn label_name(key: &str) -> &str {
    if key == CLUSTER_CONDITION_KEY {
        CLUSTER_LABEL
    } else {
        key
    }
}

/// Builds `{__name__=~"a|b",key="v",...}` from the distinct metric names and
/// the conditions a label matcher can express.
pub fn build_selector(query: &PreparedQuery) -> String {
    let mut names: Vec<&str> = Vec::new();
    for field in &query.fields {
        if !names.contains(&field.metric.as_str()) {
            names.push(&field.metric);
        }
    }
    let pattern = names
        .iter()
        .map(|name| regex_escape(name))
        .collect::<Vec<_>>()
        .join("|");

    let mut matchers = vec![format!("{}=~{}", NAME_LABEL, quote(&pattern))];
    matchers.extend(query.conditions.iter().filter_map(matcher));
    format!("{{{}}}", matchers.join(","))
}

fn matcher(condition: &Condition) -> Option<String> {
    let label = label_name(condition.key());
    match condition.operator() {
        Operator::Eq => Some(format!("{}={}", label, quote(&label_value(condition.value())))),
        Operator::Ne => Some(format!("{}!={}", label, quote(&label_value(condition.value())))),
        Operator::In => {
            let values = condition.value().as_array()?;
            let pattern = values
                .iter()
                .map(|v| regex_escape(&label_value(v)))
                .collect::<Vec<_>>()
                .join("|");
            Some(format!("{}=~{}", label, quote(&pattern)))
        }
        op => {
            warn!(
                "thanos cannot match label '{}' with '{}', condition ignored",
                condition.key(),
                op
            );
            None
        }
    }
}

fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Double quoted PromQL string literal.
fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricQuery;
    use crate::query::{EndTimePolicy, TimeRequirements};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prepare(fields: &[&str], conditions: Vec<Condition>) -> PreparedQuery {
        let query = MetricQuery {
            table: "k8s_pod".into(),
            start_time: Some(0),
            end_time: Some(60_000),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            conditions,
            ..Default::default()
        };
        PreparedQuery::prepare_at(
            &query,
            &TimeRequirements::new(EndTimePolicy::Required, "timestamp"),
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_selector_names_and_equality() {
        let query = prepare(
            &["max(k8s_pod_cpu)", "mean(k8s_pod_mem)", "min(k8s_pod_cpu)"],
            vec![
                Condition::new(CLUSTER_CONDITION_KEY, Operator::Eq, json!("cls-a")),
                Condition::new("namespace", Operator::Eq, json!("default")),
            ],
        );
        assert_eq!(
            build_selector(&query),
            r#"{__name__=~"k8s_pod_cpu|k8s_pod_mem",cluster_id="cls-a",namespace="default"}"#
        );
    }

    #[test]
    fn test_selector_other_matchers() {
        let query = prepare(
            &["sum(node.load)"],
            vec![
                Condition::new("pod", Operator::Ne, json!("a\"b")),
                Condition::new("node", Operator::In, json!(["n1", "n.2"])),
                Condition::new("restarts", Operator::Gt, json!(3)),
            ],
        );
        assert_eq!(
            build_selector(&query),
            r#"{__name__=~"node\\.load",pod!="a\"b",node=~"n1|n\\.2"}"#
        );
    }
}
