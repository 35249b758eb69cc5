//! Validated, structured form of a [`MetricQuery`].
//!
//! Every backend prepares the caller's query once, then works only with
//! [`PreparedQuery`]: fields are parsed into [`AggregatedField`] values,
//! group by entries into [`Dimension`]s, and defaults are filled in.

pub mod dimension;
pub mod field;

pub use dimension::{Dimension, TimeBucket, TIMESTAMP_DIMENSION};
pub use field::{AggFunction, AggregatedField};

use serde_json::Value;

use crate::models::{Condition, MetricQuery, Operator, Order};
use crate::{QueryEngineError, Result};

pub const DEFAULT_LIMIT: usize = 10_000;

/// How a backend treats a missing `endTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTimePolicy {
    Optional,
    DefaultNow,
    Required,
}

/// Per-backend defaulting rules.
#[derive(Debug, Clone)]
pub struct TimeRequirements {
    pub end_time: EndTimePolicy,
    /// Native time field, the default sort key.
    pub time_field: String,
}

impl TimeRequirements {
    pub fn new(end_time: EndTimePolicy, time_field: impl Into<String>) -> Self {
        Self {
            end_time,
            time_field: time_field.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub table: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub fields: Vec<AggregatedField>,
    pub conditions: Vec<Condition>,
    pub group_by: Vec<Dimension>,
    /// Output column the rows are sorted by.
    pub order_by: String,
    pub order: Order,
    pub limit: usize,
    pub offset: usize,
}

impl PreparedQuery {
    pub fn prepare(query: &MetricQuery, requirements: &TimeRequirements) -> Result<Self> {
        Self::prepare_at(query, requirements, chrono::Utc::now().timestamp_millis())
    }

    /// Same as [`PreparedQuery::prepare`] with an explicit "now" in epoch milliseconds.
    pub fn prepare_at(
        query: &MetricQuery,
        requirements: &TimeRequirements,
        now_ms: i64,
    ) -> Result<Self> {
        let start_time = query
            .start_time
            .ok_or_else(|| QueryEngineError::Validation("startTime is required".into()))?;
        let end_time = match (query.end_time, requirements.end_time) {
            (Some(end), _) => Some(end),
            (None, EndTimePolicy::Optional) => None,
            (None, EndTimePolicy::DefaultNow) => Some(now_ms),
            (None, EndTimePolicy::Required) => {
                return Err(QueryEngineError::Validation("endTime is required".into()))
            }
        };
        if let Some(end) = end_time {
            if end < start_time {
                return Err(QueryEngineError::Validation(format!(
                    "endTime {} is before startTime {}",
                    end, start_time
                )));
            }
        }

        if query.fields.is_empty() {
            return Err(QueryEngineError::Validation(
                "at least one field is required".into(),
            ));
        }
        let fields = query
            .fields
            .iter()
            .map(|raw| AggregatedField::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        for condition in &query.conditions {
            validate_condition(condition)?;
        }

        let mut group_by = query
            .group_by
            .iter()
            .map(|entry| Dimension::parse(entry))
            .collect::<Result<Vec<_>>>()?;
        if group_by.is_empty() {
            group_by.push(Dimension::Time(TimeBucket::default()));
        }
        if group_by.iter().filter(|d| d.is_time()).count() > 1 {
            return Err(QueryEngineError::Validation(
                "at most one timestamp(...) group by entry is allowed".into(),
            ));
        }

        if query.offset < 0 || query.limit < 0 {
            return Err(QueryEngineError::Validation(
                "limit and offset must not be negative".into(),
            ));
        }
        let limit = if query.limit == 0 {
            DEFAULT_LIMIT
        } else {
            query.limit as usize
        };

        let mut prepared = PreparedQuery {
            table: query.table.clone(),
            start_time,
            end_time,
            fields,
            conditions: query.conditions.clone(),
            group_by,
            order_by: String::new(),
            order: query.order.unwrap_or_default(),
            limit,
            offset: query.offset as usize,
        };
        let requested = query
            .order_by
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or(requirements.time_field.as_str());
        prepared.order_by = prepared.resolve_order_column(requested, &requirements.time_field)?;

        Ok(prepared)
    }

    pub fn time_bucket(&self) -> Option<&TimeBucket> {
        self.group_by.iter().find_map(|d| match d {
            Dimension::Time(bucket) => Some(bucket),
            Dimension::Tag(_) => None,
        })
    }

    /// Non-timestamp group by tags in request order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.group_by.iter().filter_map(|d| match d {
            Dimension::Tag(tag) => Some(tag.as_str()),
            Dimension::Time(_) => None,
        })
    }

    pub fn timestamp_column(&self) -> String {
        self.group_by
            .iter()
            .find(|d| d.is_time())
            .map(|d| d.to_string())
            .unwrap_or_else(|| TIMESTAMP_DIMENSION.to_string())
    }

    /// The group by dimension the rows are ordered on, if any.
    pub fn order_dimension(&self) -> Option<&Dimension> {
        if self.order_by == self.timestamp_column() {
            return self.group_by.iter().find(|d| d.is_time());
        }
        self.group_by
            .iter()
            .find(|d| matches!(d, Dimension::Tag(tag) if *tag == self.order_by))
    }

    pub fn find_condition(&self, key: &str, operator: Operator) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.key() == key && c.operator() == operator)
    }

    fn resolve_order_column(&self, requested: &str, time_field: &str) -> Result<String> {
        let timestamp_column = self.timestamp_column();
        if requested == time_field
            || requested == TIMESTAMP_DIMENSION
            || requested == timestamp_column
        {
            return Ok(timestamp_column);
        }
        if self.tags().any(|tag| tag == requested)
            || self.fields.iter().any(|f| f.column_name() == requested)
        {
            return Ok(requested.to_string());
        }
        Err(QueryEngineError::Validation(format!(
            "orderBy '{}' is neither a group by dimension nor a field",
            requested
        )))
    }
}

fn validate_condition(condition: &Condition) -> Result<()> {
    if !field::is_identifier(condition.key()) {
        return Err(QueryEngineError::Validation(format!(
            "invalid condition key '{}'",
            condition.key()
        )));
    }
    match (condition.operator(), condition.value()) {
        (Operator::In, Value::Array(_)) => Ok(()),
        (Operator::In, other) => Err(QueryEngineError::Validation(format!(
            "operator 'in' on '{}' requires an array value, got {}",
            condition.key(),
            other
        ))),
        (_, Value::Array(_)) | (_, Value::Object(_)) => Err(QueryEngineError::Validation(
            format!(
                "operator '{}' on '{}' requires a scalar value",
                condition.operator(),
                condition.key()
            ),
        )),
        _ => Ok(()),
    }
}
