use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{QueryEngineError, Result};

/// Sets up the logging subscriber for the application.
///
/// # Arguments
/// * `component` - Target enabled at INFO when `RUST_LOG` is unset
/// * `json` - Emit one JSON object per event instead of the compact format
pub fn init_logger(component: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", component, Level::INFO)));

    let compact_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .compact()
    });
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(compact_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| QueryEngineError::Internal(format!("Failed to initialize logger: {}", e)))
}
