use std::env;
use std::io::Read;
use std::process;

use metric_query_engine::{logging, metrics, BackendConfig, QueryEngine, QueryEngineError, Result};
use tracing::error;

#[tokio::main]
async fn main() {
    let mut print_metrics = false;
    let mut input = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--metrics" => print_metrics = true,
            _ => input = Some(arg),
        }
    }

    let json_logs = env::var("METRIC_LOG_JSON").map(|v| v == "1" || v == "true").unwrap_or(false);
    if let Err(e) = logging::init_logger("metric_query_engine", json_logs) {
        eprintln!("{}", e);
    }
    metrics::init_metrics();

    let code = match run(input.as_deref()).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            error!("query failed: {}", e);
            eprintln!("{}", e);
            exit_code(&e)
        }
    };

    if print_metrics {
        match metrics::gather_text() {
            Ok(text) => print!("{}", text),
            Err(e) => eprintln!("{}", e),
        }
    }
    process::exit(code);
}

async fn run(input: Option<&str>) -> Result<String> {
    let config = BackendConfig::from_env()?;
    let engine = QueryEngine::from_config(&config)?;
    let document = read_document(input)?;
    engine.query_json(&document).await
}

fn read_document(input: Option<&str>) -> Result<String> {
    let mut document = String::new();
    match input {
        Some(path) => {
            document = std::fs::read_to_string(path).map_err(|e| {
                QueryEngineError::Validation(format!("cannot read query file {}: {}", path, e))
            })?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut document)
                .map_err(|e| QueryEngineError::Internal(format!("cannot read stdin: {}", e)))?;
        }
    }
    Ok(document)
}

fn exit_code(err: &QueryEngineError) -> i32 {
    if err.is_client_error() {
        2
    } else {
        1
    }
}
