//! Bridge configuration file.

use std::path::Path;
use std::time::Duration;

use npk_common::LoggingConfig;
use npk_modbus::SerialLinkConfig;
use npk_telemetry::{DeviceAttributes, MqttConfig};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Value of the `device_type` attribute.
pub const DEVICE_TYPE: &str = "NPK Soil Sensor";

/// Top-level configuration, loaded once at startup.
///
/// # Example
///
/// ```json5
/// {
///   sensor: { port: "/dev/ttyUSB0", baud_rate: 4800, slave_id: 1 },
///   mqtt: { host: "demo.thingsboard.io", access_token: "A1_TEST_TOKEN" },
///   bridge: { poll_interval_secs: 60, queue_capacity: 16 },
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpkBridgeConfig {
    /// Serial link and register map.
    pub sensor: SerialLinkConfig,

    /// Broker session and delivery policy.
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub bridge: PollConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between sensor polls (default: 60)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Readings buffered for the publisher (default: 16)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    16
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Device description published as attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_location")]
    pub location: String,
}

fn default_model() -> String {
    "Generic NPK".to_string()
}

fn default_location() -> String {
    "Unknown".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            location: default_location(),
        }
    }
}

impl NpkBridgeConfig {
    /// Load and validate a JSON5 configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: Self = npk_common::load_config(path)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = npk_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.sensor.validate()?;
        self.mqtt.validate()?;
        self.logging
            .validate()
            .map_err(|e| BridgeError::validation(format!("logging: {}", e)))?;

        if self.bridge.poll_interval_secs == 0 {
            return Err(BridgeError::validation(
                "bridge.poll_interval_secs must be greater than 0",
            ));
        }

        if self.bridge.queue_capacity == 0 {
            return Err(BridgeError::validation(
                "bridge.queue_capacity must be at least 1",
            ));
        }

        Ok(())
    }

    /// Attributes sent to the platform after every connect.
    pub fn device_attributes(&self) -> DeviceAttributes {
        DeviceAttributes {
            device_type: DEVICE_TYPE.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            model: self.device.model.clone(),
            location: self.device.location.clone(),
            reading_interval: self.bridge.poll_interval_secs,
        }
    }

    /// Logging settings with an optional CLI level override.
    pub fn logging_with_override(&self, level: Option<&str>) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if let Some(level) = level {
            logging.level = level.to_string();
        }
        logging
    }
}
