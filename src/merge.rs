//! Result contract shared by every backend.
//!
//! Columns are always `[timestamp] + [fields in request order] + [tags in
//! request order]`. Backends produce rows aligned to a [`ColumnLayout`];
//! cells a backend never produced stay `null`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::models::{MetricMergedResult, Order};
use crate::query::PreparedQuery;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    columns: Vec<String>,
    field_count: usize,
    tags: Vec<String>,
}

impl ColumnLayout {
    pub fn for_query(query: &PreparedQuery) -> Self {
        let tags: Vec<String> = query.tags().map(str::to_string).collect();
        let mut columns = Vec::with_capacity(1 + query.fields.len() + tags.len());
        columns.push(query.timestamp_column());
        columns.extend(query.fields.iter().map(|f| f.column_name()));
        columns.extend(tags.iter().cloned());

        Self {
            columns,
            field_count: query.fields.len(),
            tags,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn field_column(&self, field_index: usize) -> usize {
        1 + field_index
    }

    pub fn tag_column(&self, tag_index: usize) -> usize {
        1 + self.field_count + tag_index
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn new_row(&self) -> Vec<Value> {
        vec![Value::Null; self.width()]
    }
}

/// Folds independently returned per-field series into one table keyed by
/// `(timestamp, tag combination)`.
#[derive(Debug)]
pub struct RowMerger<'a> {
    layout: &'a ColumnLayout,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl<'a> RowMerger<'a> {
    pub fn new(layout: &'a ColumnLayout) -> Self {
        Self {
            layout,
            index: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Writes one field value, allocating the row on first sight of its key.
    pub fn upsert(
        &mut self,
        timestamp: &Value,
        tags: &BTreeMap<String, String>,
        field_index: usize,
        value: Value,
    ) {
        let key = composite_key(timestamp, tags);
        let row = match self.index.get(&key) {
            Some(&row) => row,
            None => {
                let mut row = self.layout.new_row();
                row[0] = timestamp.clone();
                for (i, tag) in self.layout.tags().iter().enumerate() {
                    if let Some(v) = tags.get(tag) {
                        row[self.layout.tag_column(i)] = Value::String(v.clone());
                    }
                }
                self.rows.push(row);
                self.index.insert(key, self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        self.rows[row][self.layout.field_column(field_index)] = value;
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

fn composite_key(timestamp: &Value, tags: &BTreeMap<String, String>) -> String {
    let mut key = timestamp.to_string();
    for (k, v) in tags {
        key.push('\u{1f}');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

/// Sorts by the query's order column, then applies offset and limit.
/// No rows means no data: columns are left empty too.
pub fn finalize(
    mut rows: Vec<Vec<Value>>,
    layout: &ColumnLayout,
    query: &PreparedQuery,
) -> MetricMergedResult {
    if rows.is_empty() {
        return MetricMergedResult::empty();
    }

    if let Some(column) = layout.column_index(&query.order_by) {
        rows.sort_by(|a, b| compare_ordered(&a[column], &b[column], query.order));
    }

    let data = rows
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();

    MetricMergedResult {
        columns: layout.columns().to_vec(),
        data,
    }
}

/// Like [`compare_cells`] in the given direction; nulls stay last either way.
pub fn compare_ordered(a: &Value, b: &Value, order: Order) -> Ordering {
    match (a, b, order) {
        (Value::Null, _, _) | (_, Value::Null, _) | (_, _, Order::Asc) => compare_cells(a, b),
        (_, _, Order::Desc) => compare_cells(b, a),
    }
}

/// Numbers compare numerically, strings lexically; nulls sort last.
pub fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

/// JSON has no NaN or infinity; those samples become unset cells.
pub fn number_cell(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricQuery;
    use crate::query::{EndTimePolicy, TimeRequirements};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prepared(fields: &[&str], group_by: &[&str]) -> PreparedQuery {
        let query = MetricQuery {
            table: "k8s_pod".into(),
            start_time: Some(0),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        PreparedQuery::prepare_at(
            &query,
            &TimeRequirements::new(EndTimePolicy::Optional, "time"),
            0,
        )
        .unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_layout_order() {
        let query = prepared(&["max(a)", "mean(b)"], &["namespace", "timestamp(1s)", "pod"]);
        let layout = ColumnLayout::for_query(&query);
        assert_eq!(
            layout.columns(),
            &["timestamp(1s)", "a_max", "b_mean", "namespace", "pod"]
        );
        assert_eq!(layout.tag_column(1), 4);
    }

    #[test]
    fn test_missing_field_leaves_cell_unset() {
        let query = prepared(&["max(a)", "mean(b)"], &["pod"]);
        let layout = ColumnLayout::for_query(&query);
        let mut merger = RowMerger::new(&layout);

        merger.upsert(&json!(0), &tags(&[("pod", "p0")]), 0, json!(1));
        merger.upsert(&json!(0), &tags(&[("pod", "p1")]), 0, json!(2));
        merger.upsert(&json!(0), &tags(&[("pod", "p1")]), 1, json!(0.5));
        assert_eq!(merger.len(), 2);

        let result = finalize(merger.into_rows(), &layout, &query);
        assert_eq!(result.columns.len(), 1 + 2 + 1);
        assert_eq!(
            result.data,
            vec![
                vec![json!(0), json!(1), Value::Null, json!("p0")],
                vec![json!(0), json!(2), json!(0.5), json!("p1")],
            ]
        );
    }

    #[test]
    fn test_finalize_sorts_and_paginates() {
        let mut query = prepared(&["max(a)"], &["timestamp(1s)"]);
        query.order = Order::Desc;
        query.offset = 1;
        query.limit = 2;
        let layout = ColumnLayout::for_query(&query);
        let rows = (0..5).map(|i| vec![json!(i * 1000), json!(i)]).collect();

        let result = finalize(rows, &layout, &query);
        assert_eq!(
            result.data,
            vec![vec![json!(3000), json!(3)], vec![json!(2000), json!(2)]]
        );
    }

    #[test]
    fn test_nulls_sort_last_in_both_directions() {
        let mut query = prepared(&["max(a)"], &["pod"]);
        query.order_by = "a_max".into();
        let layout = ColumnLayout::for_query(&query);
        let rows = vec![
            vec![json!(0), Value::Null, json!("p0")],
            vec![json!(0), json!(1), json!("p1")],
            vec![json!(0), json!(3), json!("p2")],
        ];

        query.order = Order::Desc;
        let desc = finalize(rows.clone(), &layout, &query);
        let pods: Vec<&Value> = desc.data.iter().map(|row| &row[2]).collect();
        assert_eq!(pods, vec![&json!("p2"), &json!("p1"), &json!("p0")]);

        query.order = Order::Asc;
        let asc = finalize(rows, &layout, &query);
        let pods: Vec<&Value> = asc.data.iter().map(|row| &row[2]).collect();
        assert_eq!(pods, vec![&json!("p1"), &json!("p2"), &json!("p0")]);
    }

    #[test]
    fn test_no_rows_means_no_columns() {
        let query = prepared(&["max(a)"], &[]);
        let layout = ColumnLayout::for_query(&query);
        assert_eq!(finalize(vec![], &layout, &query), MetricMergedResult::empty());
    }

    #[test]
    fn test_compare_cells() {
        assert_eq!(compare_cells(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_cells(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_cells(&Value::Null, &json!(1)), Ordering::Greater);
        assert_eq!(number_cell(f64::NAN), Value::Null);
    }
}
