use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Instant;

use crate::{QueryEngineError, Result};

lazy_static! {
    // Query metrics
    pub static ref QUERY_COUNTER: IntCounterVec = register_int_counter_vec!(
        "metric_queries_total",
        "Total number of metric queries received",
        &["backend"]
    ).unwrap();

    pub static ref QUERY_FAILURES: IntCounterVec = register_int_counter_vec!(
        "metric_query_failures_total",
        "Total number of failed metric queries",
        &["backend", "kind"]
    ).unwrap();

    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "metric_query_duration_seconds",
        "Metric query duration in seconds",
        &["backend"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]
    ).unwrap();

    // Backend metrics
    pub static ref BACKEND_FAILOVERS: IntCounterVec = register_int_counter_vec!(
        "backend_failovers_total",
        "Total number of client failovers",
        &["backend"]
    ).unwrap();

    pub static ref SKIPPED_BUCKETS: IntCounter = register_int_counter!(
        "es_skipped_buckets_total",
        "Total number of malformed Elasticsearch buckets skipped during decode"
    ).unwrap();
}

pub fn init_metrics() {
    lazy_static::initialize(&QUERY_COUNTER);
    lazy_static::initialize(&QUERY_FAILURES);
    lazy_static::initialize(&QUERY_DURATION);
    lazy_static::initialize(&BACKEND_FAILOVERS);
    lazy_static::initialize(&SKIPPED_BUCKETS);
}

pub struct QueryTimer {
    backend: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(backend: &'static str) -> Self {
        QUERY_COUNTER.with_label_values(&[backend]).inc();
        Self {
            backend,
            start: Instant::now(),
        }
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        QUERY_DURATION
            .with_label_values(&[self.backend])
            .observe(duration);
    }
}

pub fn record_failure(backend: &str, err: &QueryEngineError) {
    QUERY_FAILURES
        .with_label_values(&[backend, err.kind()])
        .inc();
}

pub fn record_failover(backend: &str) {
    BACKEND_FAILOVERS.with_label_values(&[backend]).inc();
}

pub fn record_skipped_bucket() {
    SKIPPED_BUCKETS.inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| QueryEngineError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| QueryEngineError::Internal(format!("Metrics are not UTF-8: {}", e)))
}
