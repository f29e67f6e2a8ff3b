//! Process-wide logging setup for binaries.
//!
//! The library logs through the `log` facade; `init_logging` routes those
//! records into a `tracing` subscriber so they share one output with spans.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::OcrJobsError;

/// `RUST_LOG` wins when set; otherwise the configured level is used.
pub fn build_filter(level: &str) -> Result<EnvFilter, OcrJobsError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(level),
    }
    .map_err(|e| OcrJobsError::Logging(format!("invalid log filter: {}", e)))
}

/// Installs the global subscriber and the `log` bridge. Call once per process.
pub fn init_logging(config: &LoggingConfig) -> Result<(), OcrJobsError> {
    let filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        )
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
    };
    installed.map_err(|e| OcrJobsError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| OcrJobsError::Logging(e.to_string()))?;

    Ok(())
}
