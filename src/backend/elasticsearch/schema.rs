//! Index mapping introspection.
//!
//! Two document layouts are in use and both are supported:
//!
//! * `monitor`: every document carries a fixed `name`, `value` and
//!   `timestamp`; all other dimensions live under `labels.*`.
//! * `plain`: every metric and dimension is a top-level field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const LABELS_FIELD: &str = "labels";
pub const NAME_FIELD: &str = "name";
pub const VALUE_FIELD: &str = "value";

/// Flat `field path -> mapping type`.
pub type FieldTypes = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    #[default]
    Monitor,
    Plain,
}

/// Where a metric's samples live in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricTarget {
    /// The metric is its own numeric field.
    Field(String),
    /// The metric shares `value_field` and is told apart by `name_field`.
    Named {
        name_field: String,
        metric: String,
        value_field: String,
    },
}

impl SchemaVariant {
    pub fn flatten(&self, properties: &Value) -> FieldTypes {
        let mut types = FieldTypes::new();
        match self {
            SchemaVariant::Monitor => flatten_monitor(properties, &mut types),
            SchemaVariant::Plain => flatten_plain(properties, "", &mut types),
        }
        types
    }

    /// Document path of a tag or condition key.
    pub fn dimension_field(&self, name: &str, types: &FieldTypes) -> String {
        let path = match self {
            SchemaVariant::Monitor if !is_fixed_field(name) => format!("{}.{}", LABELS_FIELD, name),
            _ => name.to_string(),
        };
        keyword_path(path, types)
    }

    pub fn metric_target(&self, metric: &str, types: &FieldTypes) -> MetricTarget {
        match self {
            SchemaVariant::Plain => MetricTarget::Field(metric.to_string()),
            SchemaVariant::Monitor => MetricTarget::Named {
                name_field: keyword_path(NAME_FIELD.to_string(), types),
                metric: metric.to_string(),
                value_field: VALUE_FIELD.to_string(),
            },
        }
    }
}

fn is_fixed_field(name: &str) -> bool {
    matches!(name, NAME_FIELD | VALUE_FIELD | "timestamp")
}

/// Full text fields cannot be aggregated; use their keyword sub-field.
fn keyword_path(path: String, types: &FieldTypes) -> String {
    match types.get(&path).map(String::as_str) {
        Some("text") => {
            let keyword = format!("{}.keyword", path);
            if types.contains_key(&keyword) {
                keyword
            } else {
                path
            }
        }
        Some(_) => path,
        None => {
            debug!("field {} not found in mapping", path);
            path
        }
    }
}

fn flatten_plain(properties: &Value, prefix: &str, types: &mut FieldTypes) {
    let Some(properties) = properties.as_object() else {
        return;
    };
    for (name, mapping) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        insert_field(&path, mapping, types);
        if let Some(nested) = mapping.get("properties") {
            flatten_plain(nested, &path, types);
        }
    }
}

/// Only the fixed top-level fields and the `labels` subtree matter.
fn flatten_monitor(properties: &Value, types: &mut FieldTypes) {
    let Some(properties) = properties.as_object() else {
        return;
    };
    for (name, mapping) in properties {
        if name == LABELS_FIELD {
            if let Some(labels) = mapping.get("properties") {
                flatten_plain(labels, LABELS_FIELD, types);
            }
        } else if is_fixed_field(name) {
            insert_field(name, mapping, types);
        }
    }
}

/// Records a field and its multi-field variants such as `.keyword`.
fn insert_field(path: &str, mapping: &Value, types: &mut FieldTypes) {
    if let Some(kind) = mapping.get("type").and_then(Value::as_str) {
        types.insert(path.to_string(), kind.to_string());
    }
    if let Some(sub_fields) = mapping.get("fields").and_then(Value::as_object) {
        for (sub, sub_mapping) in sub_fields {
            if let Some(kind) = sub_mapping.get("type").and_then(Value::as_str) {
                types.insert(format!("{}.{}", path, sub), kind.to_string());
            }
        }
    }
}

/// Collects the `properties` objects of a `GET <indices>/_mapping` answer.
/// Handles both typed (`mappings.<type>.properties`) and untyped layouts.
pub fn mapping_properties(document: &Value) -> Vec<&Value> {
    let mut found = Vec::new();
    let Some(indices) = document.as_object() else {
        return found;
    };
    for index in indices.values() {
        let Some(mappings) = index.get("mappings") else {
            continue;
        };
        match mappings.get("properties") {
            Some(properties) => found.push(properties),
            None => {
                if let Some(types) = mappings.as_object() {
                    found.extend(types.values().filter_map(|t| t.get("properties")));
                }
            }
        }
    }
    found
}

pub fn field_types(variant: SchemaVariant, document: &Value) -> FieldTypes {
    let mut types = FieldTypes::new();
    for properties in mapping_properties(document) {
        types.extend(variant.flatten(properties));
    }
    types
}
