//! Configuration for the serial link and the sensor's register map.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Registers that every map must name; they become the N/P/K fields of a reading.
pub const REQUIRED_REGISTERS: [&str; 3] = ["nitrogen", "phosphorus", "potassium"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Serial link and sensor addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialLinkConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub port: String,

    /// Baud rate (default: 4800)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Modbus slave ID (1-247)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Response timeout per request in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Registers to read
    #[serde(default = "default_registers")]
    pub registers: Vec<RegisterConfig>,
}

fn default_baud_rate() -> u32 {
    4800
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_slave_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_registers() -> Vec<RegisterConfig> {
    vec![
        RegisterConfig::new("nitrogen", 0x001E).with_unit("mg/kg"),
        RegisterConfig::new("phosphorus", 0x001F).with_unit("mg/kg"),
        RegisterConfig::new("potassium", 0x0020).with_unit("mg/kg"),
    ]
}

/// A single named holding register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Channel name ("nitrogen", "temperature", ...)
    pub name: String,

    /// Register address (0-based)
    pub address: u16,

    /// Scaling factor (value * scale). Only applied to optional channels;
    /// N/P/K are published as raw integers.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset (value * scale + offset)
    #[serde(default)]
    pub offset: f64,

    /// Largest raw value the sensor can legitimately report.
    /// Anything above is a sensor fault. 0xFFFF is always a fault.
    #[serde(default)]
    pub max_raw: Option<u16>,

    /// Unit of measurement (for metadata)
    pub unit: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

impl RegisterConfig {
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self {
            name: name.into(),
            address,
            scale: default_scale(),
            offset: 0.0,
            max_raw: None,
            unit: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_max_raw(mut self, max_raw: u16) -> Self {
        self.max_raw = Some(max_raw);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Whether this register feeds one of the N/P/K fields.
    pub fn is_required(&self) -> bool {
        REQUIRED_REGISTERS.contains(&self.name.as_str())
    }
}

impl SerialLinkConfig {
    /// Config for `port` with every other field at its default.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            slave_id: default_slave_id(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            registers: default_registers(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.is_empty() {
            return Err(ConfigError::Validation(
                "Serial port cannot be empty".to_string(),
            ));
        }

        if self.slave_id == 0 || self.slave_id > 247 {
            return Err(ConfigError::Validation(format!(
                "slave_id must be 1-247, got {}",
                self.slave_id
            )));
        }

        if self.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "invalid parity '{}' (use none, even, or odd)",
                    self.parity
                )));
            }
        }

        if !matches!(self.data_bits, 5..=8) {
            return Err(ConfigError::Validation(format!(
                "data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }

        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::Validation(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }

        crate::mapping::RegisterMap::new(&self.registers).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: SerialLinkConfig = json5::from_str(r#"{ port: "/dev/ttyUSB0" }"#).unwrap();

        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 4800);
        assert_eq!(config.slave_id, 1);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(200));
        assert_eq!(config.registers.len(), 3);
        assert_eq!(config.registers[0].address, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_register_map() {
        let json = r#"{
            port: "/dev/ttyS0",
            baud_rate: 9600,
            slave_id: 2,
            registers: [
                { name: "nitrogen", address: 30, unit: "mg/kg" },
                { name: "phosphorus", address: 31 },
                { name: "potassium", address: 32 },
                { name: "temperature", address: 18, scale: 0.1, unit: "°C" },
            ]
        }"#;

        let config: SerialLinkConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.registers[3].name, "temperature");
        assert_eq!(config.registers[3].scale, 0.1);
        assert!(!config.registers[3].is_required());
        assert!(config.registers[0].is_required());
    }

    #[test]
    fn test_validate_slave_id() {
        let mut config = SerialLinkConfig::new("/dev/ttyUSB0");
        config.slave_id = 0;
        assert!(config.validate().is_err());

        config.slave_id = 248;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_parity() {
        let mut config = SerialLinkConfig::new("/dev/ttyUSB0");
        config.parity = "mark".to_string();
        assert!(config.validate().is_err());

        config.parity = "Even".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_required_register() {
        let mut config = SerialLinkConfig::new("/dev/ttyUSB0");
        config.registers.retain(|r| r.name != "potassium");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("potassium"));
    }
}
