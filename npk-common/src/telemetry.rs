use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single soil measurement produced by one successful sensor poll.
///
/// Readings are created once by the Modbus master and then moved, never
/// mutated: the orchestrator hands them to the publish queue and the
/// publisher consumes each one exactly once (or drops it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unix epoch milliseconds when the measurement was taken.
    pub timestamp: i64,

    /// Nitrogen content (mg/kg).
    pub nitrogen: u16,

    /// Phosphorus content (mg/kg).
    pub phosphorus: u16,

    /// Potassium content (mg/kg).
    pub potassium: u16,

    /// All raw registers read during the poll, in request order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_registers: Vec<u16>,

    /// Optional channels (temperature, moisture, ph, ...) after scaling.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, f64>,
}

impl Reading {
    /// Create a new reading stamped with the current time.
    pub fn new(nitrogen: u16, phosphorus: u16, potassium: u16, raw_registers: Vec<u16>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            nitrogen,
            phosphorus,
            potassium,
            raw_registers,
            extras: BTreeMap::new(),
        }
    }

    /// Override the measurement timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach an optional channel value.
    pub fn with_extra(mut self, name: impl Into<String>, value: f64) -> Self {
        self.extras.insert(name.into(), value);
        self
    }

    /// Telemetry key/value pairs: N/P/K followed by the optional channels.
    pub fn values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("nitrogen".to_string(), json!(self.nitrogen));
        values.insert("phosphorus".to_string(), json!(self.phosphorus));
        values.insert("potassium".to_string(), json!(self.potassium));
        for (name, value) in &self.extras {
            values.insert(name.clone(), json!(value));
        }
        values
    }

    /// Build the telemetry payload.
    ///
    /// Without a timestamp the payload is the flat value object and the
    /// platform stamps it on arrival. With a timestamp it is wrapped as
    /// `{"ts": <millis>, "values": {...}}`.
    pub fn to_payload(&self, include_timestamp: bool) -> Value {
        if include_timestamp {
            json!({
                "ts": self.timestamp,
                "values": Value::Object(self.values()),
            })
        } else {
            Value::Object(self.values())
        }
    }

    /// Serialize the telemetry payload to JSON bytes.
    pub fn encode_payload(&self, include_timestamp: bool) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_payload(include_timestamp))?)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
