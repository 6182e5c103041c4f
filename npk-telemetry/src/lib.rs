//! NPK Telemetry Publisher
//!
//! Keeps an MQTT session to the telemetry platform alive across outages and
//! publishes the readings handed over by the poll loop.
//!
//! - [`publish_queue`] - Bounded, non-blocking hand-off from the poll loop
//! - [`TelemetryPublisher`] - Session loop (connect, backoff, publish, redeliver)
//! - [`StateReader`] - Read-only view of the [`ConnectionState`]
//! - [`Transport`] - Broker seam, implemented on rumqttc by [`MqttTransport`]
//!
//! # Example
//!
//! ```ignore
//! use npk_telemetry::{MqttTransport, PublisherSettings, TelemetryPublisher, publish_queue};
//!
//! let (producer, consumer) = publish_queue(16);
//! let publisher = TelemetryPublisher::new(
//!     MqttTransport::new(&config.mqtt),
//!     PublisherSettings::from(&config.mqtt),
//!     consumer,
//! );
//! let state = publisher.state();
//! tokio::spawn(publisher.run(shutdown_rx));
//!
//! producer.enqueue(reading)?;
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod state;
pub mod transport;

pub use backoff::Backoff;
pub use config::{BackoffConfig, MqttConfig};
pub use error::{ConfigError, EnqueueError, PublisherError, TransportError};
pub use publisher::{DeviceAttributes, PublishEvent, PublisherSettings, TelemetryPublisher};
pub use queue::{QueueConsumer, QueueProducer, publish_queue};
pub use state::{ConnectionState, StateCell, StateReader};
pub use transport::{MqttTransport, Transport};
