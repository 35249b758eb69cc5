use chrono::{NaiveDate, TimeZone, Utc};

use crate::{QueryEngineError, Result};

const INDEX_DATE_FORMAT: &str = "%Y.%m.%d";

/// Date embedded in a `<table>-YYYY.MM.DD` index name.
pub fn index_date(index: &str, table: &str) -> Option<NaiveDate> {
    let suffix = index.strip_prefix(table)?.strip_prefix('-')?;
    NaiveDate::parse_from_str(suffix, INDEX_DATE_FORMAT).ok()
}

/// Selects the indices of `table` whose date lies within
/// `[start of day(start_ms), end_ms]`, oldest first.
pub fn resolve_indices(
    available: &[String],
    table: &str,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<String>> {
    let start_day = Utc
        .timestamp_millis_opt(start_ms)
        .single()
        .ok_or_else(|| QueryEngineError::Validation(format!("invalid startTime {}", start_ms)))?
        .date_naive();

    let mut selected: Vec<(NaiveDate, &String)> = available
        .iter()
        .filter_map(|index| index_date(index, table).map(|date| (date, index)))
        .filter(|(date, _)| {
            let day_start = date
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc().timestamp_millis())
                .unwrap_or(i64::MAX);
            *date >= start_day && day_start <= end_ms
        })
        .collect();
    selected.sort();
    selected.dedup();

    if selected.is_empty() {
        return Err(QueryEngineError::Validation(format!(
            "index not found for table '{}' between {} and {}",
            table, start_ms, end_ms
        )));
    }
    Ok(selected.into_iter().map(|(_, index)| index.clone()).collect())
}
