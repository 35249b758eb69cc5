use std::fmt;
use std::str::FromStr;

use crate::{QueryEngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunction {
    Sum,
    Avg,
    Mean,
    Max,
    Min,
    Count,
    Percentile,
}

impl AggFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunction::Sum => "sum",
            AggFunction::Avg => "avg",
            AggFunction::Mean => "mean",
            AggFunction::Max => "max",
            AggFunction::Min => "min",
            AggFunction::Count => "count",
            AggFunction::Percentile => "percentile",
        }
    }
}

impl FromStr for AggFunction {
    type Err = QueryEngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(AggFunction::Sum),
            "avg" => Ok(AggFunction::Avg),
            "mean" => Ok(AggFunction::Mean),
            "max" => Ok(AggFunction::Max),
            "min" => Ok(AggFunction::Min),
            "count" => Ok(AggFunction::Count),
            "percentile" => Ok(AggFunction::Percentile),
            other => Err(QueryEngineError::Validation(format!(
                "unsupported aggregation function '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `function(metric)` entry of a query's field list.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedField {
    pub function: AggFunction,
    pub metric: String,
    /// Percent for `percentile(metric,N)`.
    pub param: Option<f64>,
}

impl AggregatedField {
    pub fn new(function: AggFunction, metric: impl Into<String>) -> Self {
        Self {
            function,
            metric: metric.into(),
            param: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || {
            QueryEngineError::Validation(format!(
                "field '{}' is not of the form function(metric)",
                raw
            ))
        };

        let raw_trimmed = raw.trim();
        let open = raw_trimmed.find('(').ok_or_else(invalid)?;
        let inner = raw_trimmed[open + 1..]
            .strip_suffix(')')
            .ok_or_else(invalid)?;
        let function: AggFunction = raw_trimmed[..open].trim().parse()?;

        let mut args = inner.split(',').map(str::trim);
        let metric = args.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        if !is_identifier(metric) {
            return Err(QueryEngineError::Validation(format!(
                "invalid metric name '{}' in field '{}'",
                metric, raw
            )));
        }

        let param = match args.next() {
            None => None,
            Some(_) if function != AggFunction::Percentile => {
                return Err(QueryEngineError::Validation(format!(
                    "function '{}' does not take a parameter",
                    function
                )))
            }
            Some(p) => {
                let percent: f64 = p.parse().map_err(|_| {
                    QueryEngineError::Validation(format!("invalid percentile '{}' in '{}'", p, raw))
                })?;
                if !(percent > 0.0 && percent <= 100.0) {
                    return Err(QueryEngineError::Validation(format!(
                        "percentile must be within (0, 100], got {}",
                        percent
                    )));
                }
                Some(percent)
            }
        };
        if args.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            function,
            metric: metric.to_string(),
            param,
        })
    }

    /// Caller facing output column, e.g. `k8s_pod_cpu_core_used_mean`.
    pub fn column_name(&self) -> String {
        format!("{}_{}", self.metric, self.function)
    }
}

impl FromStr for AggregatedField {
    type Err = QueryEngineError;

    fn from_str(s: &str) -> Result<Self> {
        AggregatedField::parse(s)
    }
}

/// Metric, tag and label names share one conservative character set.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_field() {
        let field = AggregatedField::parse("max(k8s_pod_status_ready)").unwrap();
        assert_eq!(field.function, AggFunction::Max);
        assert_eq!(field.metric, "k8s_pod_status_ready");
        assert_eq!(field.param, None);
        assert_eq!(field.column_name(), "k8s_pod_status_ready_max");
    }

    #[test]
    fn test_parse_percentile() {
        let field: AggregatedField = " percentile( k8s_pod_mem , 95 ) ".parse().unwrap();
        assert_eq!(field.function, AggFunction::Percentile);
        assert_eq!(field.metric, "k8s_pod_mem");
        assert_eq!(field.param, Some(95.0));
        assert_eq!(field.column_name(), "k8s_pod_mem_percentile");
    }

    #[test]
    fn test_rejects_malformed_fields() {
        for raw in [
            "k8s_pod_cpu",
            "max(k8s_pod_cpu",
            "max()",
            "median(k8s_pod_cpu)",
            "max(k8s pod)",
            "max(a,1)",
            "percentile(a,0)",
            "percentile(a,150)",
            "percentile(a,x)",
            "percentile(a,1,2)",
        ] {
            let err = AggregatedField::parse(raw).unwrap_err();
            assert!(err.is_client_error(), "{} should be rejected", raw);
        }
    }
}
