//! JSON5 configuration loading and logging settings.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Levels accepted in `logging.level` and `--log-level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Crates whose events follow the configured level; everything else logs at `warn`.
const BRIDGE_CRATES: [&str; 4] = ["npk_common", "npk_modbus", "npk_telemetry", "npk_bridge"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines for a terminal or journald.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// `logging` section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of [`LOG_LEVELS`].
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "unknown log level '{}', expected one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }

    /// Filter directives: the configured level for the bridge crates, `warn`
    /// for dependencies such as rumqttc.
    pub fn directives(&self) -> String {
        let level = self.level.to_lowercase();
        let mut directives = vec!["warn".to_string()];
        directives.extend(BRIDGE_CRATES.iter().map(|krate| format!("{krate}={level}")));
        directives.join(",")
    }
}

/// Read and deserialize a JSON5 file.
///
/// A file that cannot be read is an [`Error::Io`]; malformed content is an
/// [`Error::Config`] naming the file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    json5::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Deserialize JSON5 from a string.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_logging() {
        let config: Wrapper = parse_config("{}").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.logging.validate().is_ok());
    }

    #[test]
    fn test_json_logging_format() {
        let config: Wrapper =
            parse_config(r#"{ logging: { level: "debug", format: "json" } }"#).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_level_validation() {
        let mut logging = LoggingConfig::default();
        logging.level = "WARN".to_string();
        assert!(logging.validate().is_ok());

        logging.level = "verbose".to_string();
        let err = logging.validate().unwrap_err();
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_directives_scope_dependencies() {
        let mut logging = LoggingConfig::default();
        logging.level = "Debug".to_string();

        let directives = logging.directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("npk_modbus=debug"));
        assert!(directives.contains("npk_telemetry=debug"));
        assert!(!directives.contains("rumqttc"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<Wrapper> = load_config("/nonexistent/npk-bridge.json5");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_error() {
        let result: Result<Wrapper> = parse_config("{ logging: ");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
