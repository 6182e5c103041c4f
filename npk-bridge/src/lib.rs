//! NPK soil sensor bridge.
//!
//! Polls an RS485 NPK sensor over Modbus-RTU on a fixed period and publishes
//! each reading as MQTT telemetry.
//!
//! # Overview
//!
//! - [`NpkBridgeConfig`] loads and validates the JSON5 configuration file
//! - [`PollLoop`] reads the sensor and hands readings to the publish queue
//! - [`BridgeRunner`] owns the loops, the shutdown signal and signal handling
//! - [`BridgeStats`] counts readings, failures and drops for the exit summary
//!
//! The poll loop never waits on the broker: when the publish queue is full
//! the newest reading is dropped and the loop keeps its period.

mod args;
mod config;
mod error;
mod orchestrator;
mod runner;
mod stats;

pub use args::BridgeArgs;
pub use config::{DEVICE_TYPE, DeviceConfig, NpkBridgeConfig, PollConfig};
pub use error::{BridgeError, Result};
pub use orchestrator::{PollLoop, PollOutcome, ReadingSource};
pub use runner::{BridgeRunner, ShutdownHandle, open_sensor, run_bridge};
pub use stats::{BridgeStats, StatsSnapshot};
