//! Modbus-RTU master for RS485 NPK soil sensors.
//!
//! The master polls a single slave over a half-duplex serial line using
//! function 0x03 (read holding registers) and maps the registers onto a
//! [`npk_common::Reading`].
//!
//! # Layers
//!
//! - [`codec`] - Pure frame encoding/decoding with CRC-16/MODBUS
//! - [`mapping`] - Register map validation, request planning, value mapping
//! - [`master`] - Timeouts, retries and exclusive line access
//! - [`serial`] - Opening the RS485 adapter

pub mod codec;
pub mod config;
pub mod mapping;
pub mod master;
pub mod serial;

pub use codec::{CodecError, ExceptionCode, ReadHoldingRequest, ReadHoldingResponse};
pub use config::{ConfigError, RegisterConfig, SerialLinkConfig};
pub use mapping::{RegisterGroup, RegisterMap};
pub use master::{AdapterError, ModbusMaster, RetryPolicy};
