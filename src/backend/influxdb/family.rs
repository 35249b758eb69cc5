/// How a metric is stored and aggregated in InfluxDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    /// Stored in the per-cluster database, aggregated in one pass.
    Cluster,
    /// Stored in the shared cross-tenant database. Co-located series are
    /// summed per sample interval before the requested function runs.
    Project,
}

/// Prefix rules mapping metric names to their family. The first matching
/// rule wins; unmatched metrics are cluster metrics.
#[derive(Debug, Clone)]
pub struct FamilyRegistry {
    rules: Vec<(String, MetricFamily)>,
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::empty().with_rule("project_", MetricFamily::Project)
    }
}

impl FamilyRegistry {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, prefix: impl Into<String>, family: MetricFamily) -> Self {
        self.rules.push((prefix.into(), family));
        self
    }

    pub fn lookup(&self, metric: &str) -> MetricFamily {
        self.rules
            .iter()
            .find(|(prefix, _)| metric.starts_with(prefix.as_str()))
            .map(|(_, family)| *family)
            .unwrap_or(MetricFamily::Cluster)
    }
}
