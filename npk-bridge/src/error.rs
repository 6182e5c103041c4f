//! Error types for the bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while setting up the bridge.
///
/// Runtime failures (sensor, broker) never surface here; they are
/// classified and logged by the loops that hit them.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Serial port could not be opened.
    #[error("Failed to open serial port {port}: {message}")]
    Serial { port: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<npk_common::Error> for BridgeError {
    fn from(err: npk_common::Error) -> Self {
        match err {
            npk_common::Error::Io(e) => Self::Io(e),
            other => Self::ConfigParse(other.to_string()),
        }
    }
}

impl From<npk_modbus::ConfigError> for BridgeError {
    fn from(err: npk_modbus::ConfigError) -> Self {
        Self::ConfigValidation(format!("sensor: {}", err))
    }
}

impl From<npk_telemetry::ConfigError> for BridgeError {
    fn from(err: npk_telemetry::ConfigError) -> Self {
        Self::ConfigValidation(format!("mqtt: {}", err))
    }
}
