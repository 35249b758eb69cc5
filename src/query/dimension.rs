use std::fmt;
use std::time::Duration;

use super::field::is_identifier;
use crate::{QueryEngineError, Result};

pub const TIMESTAMP_DIMENSION: &str = "timestamp";
pub const DEFAULT_BUCKET: &str = "60s";

/// Width of a `timestamp(<duration>)` bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBucket {
    raw: String,
    count: u64,
    unit: &'static str,
    millis: i64,
}

impl TimeBucket {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, unit) = raw.split_at(split);

        let count: u64 = digits.parse().map_err(|_| {
            QueryEngineError::Validation(format!("invalid bucket duration '{}'", raw))
        })?;
        let (unit, millis_per_unit): (&'static str, u64) = match unit {
            "ms" => ("ms", 1),
            "s" => ("s", 1_000),
            "m" => ("m", 60_000),
            "h" => ("h", 3_600_000),
            "d" => ("d", 86_400_000),
            "w" => ("w", 7 * 86_400_000),
            _ => {
                return Err(QueryEngineError::Validation(format!(
                    "invalid bucket duration unit in '{}'",
                    raw
                )))
            }
        };
        if count == 0 {
            return Err(QueryEngineError::Validation(format!(
                "bucket duration must be positive, got '{}'",
                raw
            )));
        }
        let millis = count
            .checked_mul(millis_per_unit)
            .and_then(|ms| i64::try_from(ms).ok())
            .ok_or_else(|| {
                QueryEngineError::Validation(format!("bucket duration '{}' is too large", raw))
            })?;

        Ok(Self {
            raw: raw.to_string(),
            count,
            unit,
            millis,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.millis.unsigned_abs())
    }

    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Elasticsearch fixed intervals do not accept weeks.
    pub fn es_interval(&self) -> String {
        if self.unit == "w" {
            format!("{}d", self.count * 7)
        } else {
            self.raw.clone()
        }
    }
}

impl Default for TimeBucket {
    fn default() -> Self {
        Self {
            raw: DEFAULT_BUCKET.to_string(),
            count: 60,
            unit: "s",
            millis: 60_000,
        }
    }
}

/// One `groupBy` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    Time(TimeBucket),
    Tag(String),
}

impl Dimension {
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry == TIMESTAMP_DIMENSION {
            return Ok(Dimension::Time(TimeBucket::default()));
        }
        if let Some(rest) = entry.strip_prefix("timestamp(") {
            let inner = rest.strip_suffix(')').ok_or_else(|| {
                QueryEngineError::Validation(format!("malformed time dimension '{}'", entry))
            })?;
            return Ok(Dimension::Time(TimeBucket::parse(inner)?));
        }
        if !is_identifier(entry) {
            return Err(QueryEngineError::Validation(format!(
                "invalid group by tag '{}'",
                entry
            )));
        }
        Ok(Dimension::Tag(entry.to_string()))
    }

    /// Name used for aggregation keys and order matching.
    pub fn name(&self) -> &str {
        match self {
            Dimension::Time(_) => TIMESTAMP_DIMENSION,
            Dimension::Tag(tag) => tag,
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Dimension::Time(_))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Time(bucket) => write!(f, "timestamp({})", bucket.raw()),
            Dimension::Tag(tag) => f.write_str(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_units() {
        assert_eq!(TimeBucket::parse("500ms").unwrap().as_millis(), 500);
        assert_eq!(TimeBucket::parse("1s").unwrap().as_millis(), 1_000);
        assert_eq!(TimeBucket::parse("5m").unwrap().as_millis(), 300_000);
        assert_eq!(TimeBucket::parse("2h").unwrap().as_millis(), 7_200_000);
        assert_eq!(TimeBucket::parse("1w").unwrap().es_interval(), "7d");
        assert_eq!(TimeBucket::default().as_millis(), 60_000);
    }

    #[test]
    fn test_bucket_rejects_garbage() {
        for raw in ["", "s", "0s", "10", "10y", "-1s", "1.5s"] {
            assert!(TimeBucket::parse(raw).is_err(), "{} should be rejected", raw);
        }
        for raw in ["9999999999999999999s", "18446744073709551615ms", "30000000000000w"] {
            let err = TimeBucket::parse(raw).unwrap_err();
            assert!(matches!(err, QueryEngineError::Validation(msg) if msg.contains("too large")));
        }
        assert_eq!(
            TimeBucket::parse("9223372036854775807ms").unwrap().as_millis(),
            i64::MAX
        );
    }

    #[test]
    fn test_dimension_parse() {
        let time = Dimension::parse("timestamp(1s)").unwrap();
        assert!(time.is_time());
        assert_eq!(time.name(), "timestamp");
        assert_eq!(time.to_string(), "timestamp(1s)");

        let tag = Dimension::parse("pod_name").unwrap();
        assert_eq!(tag, Dimension::Tag("pod_name".into()));

        assert!(Dimension::parse("timestamp(1s").is_err());
        assert!(Dimension::parse("pod name").is_err());
    }
}
