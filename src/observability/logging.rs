//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] seeded from the configured
//! level (overridden by `RUST_LOG`) and a JSON or human-readable fmt layer.

use crate::core::config::LoggingConfig;
use crate::core::error::{GatewayError, GatewayResult};
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(format: &str) -> GatewayResult<Self> {
        match format.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(GatewayError::config(format!("Unknown log format: {}", other))),
        }
    }
}

fn parse_level(level: &str) -> GatewayResult<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(GatewayError::config(format!("Unknown log level: {}", other))),
    }
}

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
fn env_filter(config: &LoggingConfig) -> GatewayResult<EnvFilter> {
    let level = parse_level(&config.level)?;
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy())
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or the configuration is invalid.
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let filter = env_filter(config)?;

    let result = match LogFormat::parse(&config.format)? {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
    };

    result.map_err(|e| GatewayError::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    info!(level = %config.level, format = %config.format, "Logging initialized");
    Ok(())
}
