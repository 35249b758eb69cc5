pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod query;

pub use config::BackendConfig;
pub use engine::QueryEngine;
pub use error::{QueryEngineError, Result};
pub use models::{Condition, MetricMergedResult, MetricQuery, Operator, Order};
