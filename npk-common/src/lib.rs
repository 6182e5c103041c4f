//! NPK Bridge Common Library
//!
//! This crate provides shared types and utilities for the NPK soil sensor bridge:
//!
//! - [`telemetry`] - The `Reading` data model and its telemetry payload
//! - [`health`] - Failure classification (`transient` vs `fault`)
//! - [`shutdown`] - The process-wide shutdown signal
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod health;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LOG_LEVELS, LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use health::FailureClass;
pub use shutdown::shutdown_requested;
pub use telemetry::{Reading, current_timestamp_millis};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set. Without
/// it, dependencies log at `warn` and the bridge crates at the configured
/// level. Logs go to stderr so stdout stays free for command output.
///
/// # Example
///
/// ```ignore
/// use npk_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))?;

    let layer = match config.format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let directives = filter.to_string();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;

    tracing::debug!(filter = %directives, format = ?config.format, "Logging initialized");
    Ok(())
}
