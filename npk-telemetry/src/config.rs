//! MQTT broker and session configuration.

use std::time::Duration;

use rumqttc::{MqttOptions, QoS};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Broker connection, topics and delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    pub host: String,

    /// Broker port (default: 1883)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device access token, sent as the MQTT username.
    pub access_token: String,

    /// Client identifier (default: "npk-bridge-<pid>")
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// QoS level 0, 1 or 2 (default: 1)
    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default)]
    pub retain: bool,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    #[serde(default = "default_telemetry_topic")]
    pub telemetry_topic: String,

    #[serde(default = "default_attributes_topic")]
    pub attributes_topic: String,

    /// Wrap readings as `{"ts": .., "values": {..}}`.
    #[serde(default)]
    pub include_timestamp: bool,

    /// Bound on a handshake, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on a single publish including its acknowledgement, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Redeliveries of a reading whose publish failed before it is dropped.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_telemetry_topic() -> String {
    "v1/devices/me/telemetry".to_string()
}

fn default_attributes_topic() -> String {
    "v1/devices/me/attributes".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_max_redeliveries() -> u32 {
    3
}

/// Reconnect backoff after failed handshakes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,

    /// Extra random delay as a fraction of the current delay, 0.0 to 1.0.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_ms() -> u64 {
    2_000
}

fn default_cap_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ms == 0 {
            return Err(ConfigError::Validation(
                "backoff.base_ms must be greater than 0".to_string(),
            ));
        }
        if self.base_ms > self.cap_ms {
            return Err(ConfigError::Validation(format!(
                "backoff.base_ms ({}) cannot exceed backoff.cap_ms ({})",
                self.base_ms, self.cap_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation(format!(
                "backoff.jitter must be within 0.0-1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

impl MqttConfig {
    /// Config for `host` and `access_token` with every other field at its default.
    pub fn new(host: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            access_token: access_token.into(),
            client_id: None,
            keepalive_secs: default_keepalive_secs(),
            qos: default_qos(),
            retain: false,
            clean_session: true,
            telemetry_topic: default_telemetry_topic(),
            attributes_topic: default_attributes_topic(),
            include_timestamp: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_redeliveries: default_max_redeliveries(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("npk-bridge-{}", std::process::id()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// rumqttc options for this broker.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(), &self.host, self.port);
        options.set_credentials(&self.access_token, "");
        options.set_keep_alive(Duration::from_secs(self.keepalive_secs));
        options.set_clean_session(self.clean_session);
        options
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT host cannot be empty".to_string(),
            ));
        }

        if self.access_token.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT access_token cannot be empty".to_string(),
            ));
        }

        if self.qos > 2 {
            return Err(ConfigError::Validation(format!(
                "qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }

        // rumqttc rejects keepalives below 5 seconds
        if self.keepalive_secs < 5 {
            return Err(ConfigError::Validation(format!(
                "keepalive_secs must be at least 5, got {}",
                self.keepalive_secs
            )));
        }

        if self.telemetry_topic.is_empty() || self.attributes_topic.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT topics cannot be empty".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 || self.publish_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms and publish_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.backoff.validate()
    }
}
