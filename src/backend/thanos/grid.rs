//! Dense time x tag grid for matrix results.
//!
//! Row `slot * tag_count + tag_index` holds the samples taken at
//! `start + slot * step` for one tag combination. Combinations are indexed
//! in sorted order so the layout does not depend on series order.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::warn;

use super::client::MatrixSeries;
use super::selector::{label_name, NAME_LABEL};
use crate::merge::{number_cell, ColumnLayout};
use crate::query::PreparedQuery;

pub struct Grid<'a> {
    layout: &'a ColumnLayout,
    start_ms: i64,
    step_ms: i64,
    combos: BTreeMap<Vec<Option<String>>, usize>,
    rows: Vec<Vec<Value>>,
}

impl<'a> Grid<'a> {
    pub fn new(
        layout: &'a ColumnLayout,
        series: &[MatrixSeries],
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Self {
        let mut combos: BTreeMap<Vec<Option<String>>, usize> = series
            .iter()
            .map(|s| (tag_combo(layout, s), 0))
            .collect();
        for (index, slot) in combos.values_mut().enumerate() {
            *slot = index;
        }

        let step_ms = step_ms.max(1);
        let span = end_ms.saturating_sub(start_ms).max(0);
        let slots = span / step_ms + i64::from(span % step_ms != 0) + 1;
        let rows = vec![layout.new_row(); slots as usize * combos.len()];
        Self {
            layout,
            start_ms,
            step_ms,
            combos,
            rows,
        }
    }

    pub fn tag_count(&self) -> usize {
        self.combos.len()
    }

    /// Writes every sample of `series` into each field column whose metric
    /// is the series' name.
    pub fn scatter(&mut self, query: &PreparedQuery, series: &MatrixSeries) {
        let name = series
            .metric
            .get(NAME_LABEL)
            .map(String::as_str)
            .unwrap_or_default();
        let columns: Vec<usize> = query
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.metric == name)
            .map(|(i, _)| self.layout.field_column(i))
            .collect();
        if columns.is_empty() {
            warn!("thanos returned unrequested metric '{}'", name);
            return;
        }

        let combo = tag_combo(self.layout, series);
        let Some(&tag_index) = self.combos.get(&combo) else {
            return;
        };
        for (seconds, raw) in &series.values {
            let timestamp = (seconds * 1_000.0).round() as i64;
            if timestamp < self.start_ms {
                continue;
            }
            let slot = ((timestamp - self.start_ms) / self.step_ms) as usize;
            let row = slot * self.tag_count() + tag_index;
            if row >= self.rows.len() {
                let width = (slot + 1) * self.tag_count();
                self.rows.resize(width, self.layout.new_row());
            }

            let cells = &mut self.rows[row];
            cells[0] = json!(timestamp);
            for (i, value) in combo.iter().enumerate() {
                if let Some(value) = value {
                    cells[self.layout.tag_column(i)] = Value::String(value.clone());
                }
            }
            let value = raw.parse::<f64>().map(number_cell).unwrap_or(Value::Null);
            for &column in &columns {
                cells[column] = value.clone();
            }
        }
    }

    /// Rows that never received a sample are dropped, wherever they sit in
    /// the grid.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows.into_iter().filter(|row| !row[0].is_null()).collect()
    }
}

fn tag_combo(layout: &ColumnLayout, series: &MatrixSeries) -> Vec<Option<String>> {
    layout
        .tags()
        .iter()
        .map(|tag| series.metric.get(label_name(tag)).cloned())
        .collect()
}
