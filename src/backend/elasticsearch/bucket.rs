//! Decoding of nested `terms` / `date_histogram` aggregation answers.
//!
//! The raw JSON is first parsed into a typed [`Level`] tree; malformed
//! buckets are dropped (and counted) at that stage. [`Level::flatten`] then
//! walks the well-formed tree into one [`FlatRow`] per leaf.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::metrics;

/// The buckets of one grouping level.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub dimension: String,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Bucket {
    Branch { key: Value, child: Level },
    Leaf { key: Value, metrics: BTreeMap<String, Value> },
}

/// One leaf bucket: the key of every enclosing level plus the metric values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    pub keys: BTreeMap<String, Value>,
    pub metrics: BTreeMap<String, Value>,
}

impl FlatRow {
    /// Bucket key rendered as a tag value.
    pub fn tag(&self, name: &str) -> Option<String> {
        self.keys.get(name).map(|key| match key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl Level {
    /// Parses the aggregation named `levels[0]` out of `node`, descending
    /// through the remaining levels. Returns `None` when the level itself is
    /// missing.
    pub fn parse(node: &Value, levels: &[&str], metric_names: &[String]) -> Option<Level> {
        let (dimension, inner) = levels.split_first()?;
        let Some(raw_buckets) = node
            .get(*dimension)
            .and_then(|agg| agg.get("buckets"))
            .and_then(Value::as_array)
        else {
            skip(&format!("aggregation '{}' has no buckets", dimension));
            return None;
        };

        let buckets = raw_buckets
            .iter()
            .filter_map(|raw| parse_bucket(raw, dimension, inner, metric_names))
            .collect();
        Some(Level {
            dimension: dimension.to_string(),
            buckets,
        })
    }

    pub fn flatten(&self) -> Vec<FlatRow> {
        let mut rows = Vec::new();
        self.walk(&FlatRow::default(), &mut rows);
        rows
    }

    fn walk(&self, prefix: &FlatRow, rows: &mut Vec<FlatRow>) {
        for bucket in &self.buckets {
            let mut row = prefix.clone();
            match bucket {
                Bucket::Branch { key, child } => {
                    row.keys.insert(self.dimension.clone(), key.clone());
                    child.walk(&row, rows);
                }
                Bucket::Leaf { key, metrics } => {
                    row.keys.insert(self.dimension.clone(), key.clone());
                    row.metrics = metrics.clone();
                    rows.push(row);
                }
            }
        }
    }
}

/// Parses and flattens in one call; no buckets means no rows.
pub fn flatten(aggregations: &Value, levels: &[&str], metric_names: &[String]) -> Vec<FlatRow> {
    Level::parse(aggregations, levels, metric_names)
        .map(|level| level.flatten())
        .unwrap_or_default()
}

fn parse_bucket(
    raw: &Value,
    dimension: &str,
    inner: &[&str],
    metric_names: &[String],
) -> Option<Bucket> {
    let Some(key) = raw.get("key").filter(|k| !k.is_null()) else {
        skip(&format!("bucket of '{}' has no key", dimension));
        return None;
    };
    if inner.is_empty() {
        return Some(Bucket::Leaf {
            key: key.clone(),
            metrics: parse_metrics(raw, metric_names),
        });
    }
    Level::parse(raw, inner, metric_names).map(|child| Bucket::Branch {
        key: key.clone(),
        child,
    })
}

fn parse_metrics(bucket: &Value, metric_names: &[String]) -> BTreeMap<String, Value> {
    let mut metrics = BTreeMap::new();
    for name in metric_names {
        match bucket.get(name).map(|agg| metric_value(agg, name)) {
            Some(Some(value)) => {
                metrics.insert(name.clone(), value);
            }
            Some(None) => skip(&format!("metric '{}' has an unknown shape", name)),
            None => {}
        }
    }
    metrics
}

/// Single value metrics carry `value`, percentiles carry `values`, and
/// filter wrapped metrics nest the real aggregation under the same name.
fn metric_value(agg: &Value, name: &str) -> Option<Value> {
    if let Some(value) = agg.get("value") {
        return Some(value.clone());
    }
    if let Some(values) = agg.get("values").and_then(Value::as_object) {
        let mut entries = values.values();
        return match (entries.next(), entries.next()) {
            (Some(single), None) => Some(single.clone()),
            _ => Some(Value::Object(values.clone())),
        };
    }
    agg.get(name).and_then(|inner| metric_value(inner, name))
}

fn skip(reason: &str) {
    warn!("skipping elasticsearch bucket: {}", reason);
    metrics::record_skipped_bucket();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_typed_tree() {
        let aggregations = json!({"node": {"buckets": [
            {"key": "n1", "doc_count": 1, "cpu_max": {"value": 4}}
        ]}});
        let level = Level::parse(&aggregations, &["node"], &names(&["cpu_max"])).unwrap();
        assert_eq!(
            level,
            Level {
                dimension: "node".into(),
                buckets: vec![Bucket::Leaf {
                    key: json!("n1"),
                    metrics: [("cpu_max".to_string(), json!(4))].into_iter().collect(),
                }],
            }
        );
    }

    #[test]
    fn test_flatten_nested_levels() {
        let aggregations = json!({"pod_name": {"buckets": [
            {"key": "a", "doc_count": 2, "timestamp": {"buckets": [
                {"key": 1000, "key_as_string": "1000", "cpu_avg": {"value": 0.5}},
                {"key": 2000, "cpu_avg": {"value": null}}
            ]}},
            {"key": "b", "timestamp": {"buckets": [
                {"key": 1000, "cpu_avg": {"value": 1.5}}
            ]}}
        ]}});

        let rows = flatten(&aggregations, &["pod_name", "timestamp"], &names(&["cpu_avg"]));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].tag("pod_name").as_deref(), Some("a"));
        assert_eq!(rows[0].keys["timestamp"], json!(1000));
        assert_eq!(rows[0].metrics["cpu_avg"], json!(0.5));
        assert_eq!(rows[1].metrics["cpu_avg"], Value::Null);
        assert_eq!(rows[2].tag("pod_name").as_deref(), Some("b"));
    }

    #[test]
    fn test_metric_shapes() {
        assert_eq!(
            metric_value(&json!({"values": {"95.0": 3.25}}), "mem_percentiles"),
            Some(json!(3.25))
        );
        assert_eq!(
            metric_value(&json!({"values": {"50.0": 1, "99.0": 2}}), "mem_percentiles"),
            Some(json!({"50.0": 1, "99.0": 2}))
        );
        assert_eq!(
            metric_value(&json!({"doc_count": 4, "cpu_avg": {"value": 2.0}}), "cpu_avg"),
            Some(json!(2.0))
        );
        assert_eq!(metric_value(&json!({"doc_count": 4}), "cpu_avg"), None);
    }

    #[test]
    fn test_malformed_buckets_are_skipped() {
        let before = metrics::SKIPPED_BUCKETS.get();
        let aggregations = json!({"node": {"buckets": [
            {"doc_count": 1, "cpu_max": {"value": 1}},
            {"key": 7, "cpu_max": {"value": 2}},
            {"key": "n2", "cpu_max": {"weird": true}}
        ]}});

        let rows = flatten(&aggregations, &["node"], &names(&["cpu_max"]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tag("node").as_deref(), Some("7"));
        assert!(rows[1].metrics.is_empty());
        assert!(metrics::SKIPPED_BUCKETS.get() >= before + 2);
    }

    #[test]
    fn test_branch_without_child_level_is_dropped() {
        let aggregations = json!({"pod_name": {"buckets": [
            {"key": "a", "doc_count": 0},
            {"key": "b", "timestamp": {"buckets": [{"key": 0, "cpu_max": {"value": 1}}]}}
        ]}});
        let rows = flatten(&aggregations, &["pod_name", "timestamp"], &names(&["cpu_max"]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tag("pod_name").as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_level_yields_nothing() {
        let rows = flatten(&json!({}), &["timestamp"], &names(&["cpu_max"]));
        assert!(rows.is_empty());
    }
}
