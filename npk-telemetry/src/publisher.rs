//! Telemetry publisher: owns the broker session and drains the publish queue.

use std::time::Duration;

use npk_common::{Reading, shutdown_requested};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::{BackoffConfig, MqttConfig};
use crate::error::PublisherError;
use crate::queue::QueueConsumer;
use crate::state::{ConnectionState, StateCell, StateReader};
use crate::transport::Transport;

/// Static device description sent to the attributes topic after every connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceAttributes {
    pub device_type: String,
    pub firmware_version: String,
    pub model: String,
    pub location: String,
    /// Poll period in seconds.
    pub reading_interval: u64,
}

/// Outcome reported back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Published {
        timestamp: i64,
    },
    /// A publish failed; `requeued` tells whether the reading will be retried.
    PublishFailed {
        timestamp: i64,
        requeued: bool,
    },
    /// The reading was given up after `attempts` publishes.
    Dropped {
        reading: Reading,
        attempts: u32,
    },
}

/// Publisher timing and delivery policy.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub telemetry_topic: String,
    pub attributes_topic: String,
    pub include_timestamp: bool,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub max_redeliveries: u32,
    pub backoff: BackoffConfig,
}

impl From<&MqttConfig> for PublisherSettings {
    fn from(config: &MqttConfig) -> Self {
        Self {
            telemetry_topic: config.telemetry_topic.clone(),
            attributes_topic: config.attributes_topic.clone(),
            include_timestamp: config.include_timestamp,
            connect_timeout: config.connect_timeout(),
            publish_timeout: config.publish_timeout(),
            max_redeliveries: config.max_redeliveries,
            backoff: config.backoff.clone(),
        }
    }
}

/// A reading whose delivery is in progress.
#[derive(Debug)]
struct InFlight {
    reading: Reading,
    redeliveries: u32,
}

/// MQTT session loop.
///
/// Holds the only mutable reference to the transport and the only writer of
/// the connection state. Readings come in through the [`QueueConsumer`]; a
/// reading whose publish failed is kept aside and sent again before anything
/// else in the queue.
pub struct TelemetryPublisher<T> {
    transport: T,
    settings: PublisherSettings,
    queue: QueueConsumer,
    state: StateCell,
    backoff: Backoff,
    attributes: Option<DeviceAttributes>,
    events: Option<mpsc::UnboundedSender<PublishEvent>>,
    in_flight: Option<InFlight>,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(transport: T, settings: PublisherSettings, queue: QueueConsumer) -> Self {
        let (state, _) = StateCell::new();
        let backoff = Backoff::new(&settings.backoff);

        Self {
            transport,
            settings,
            queue,
            state,
            backoff,
            attributes: None,
            events: None,
            in_flight: None,
        }
    }

    /// Publish `attributes` after every successful connect.
    pub fn with_attributes(mut self, attributes: DeviceAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Report outcomes on `events`.
    ///
    /// The channel is unbounded so drop and failure events are never lost;
    /// its growth is bounded by the backoff between sessions.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PublishEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Read-only view of the connection state.
    pub fn state(&self) -> StateReader {
        self.state.reader()
    }

    /// Run the session loop until shutdown is requested or every producer is gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.settings.telemetry_topic, "Telemetry publisher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.state.get() {
                // Only reached at startup; a lost session goes through Backoff.
                ConnectionState::Disconnected => self.transition(ConnectionState::Connecting),

                ConnectionState::Connecting => {
                    let result = tokio::select! {
                        result = timeout(self.settings.connect_timeout, self.transport.connect()) => result,
                        _ = shutdown_requested(&mut shutdown) => break,
                    };

                    let outcome = match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(PublisherError::ConnectFailed(e.to_string())),
                        Err(_) => Err(PublisherError::ConnectFailed(format!(
                            "no CONNACK within {:?}",
                            self.settings.connect_timeout
                        ))),
                    };

                    match outcome {
                        Ok(()) => self.on_connected().await,
                        Err(e) => self.on_connect_failed(e),
                    }
                }

                ConnectionState::Backoff { until, .. } => {
                    tokio::select! {
                        _ = sleep_until(until) => self.transition(ConnectionState::Connecting),
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }

                ConnectionState::Connected => {
                    let in_flight = match self.in_flight.take() {
                        Some(in_flight) => in_flight,
                        None => {
                            tokio::select! {
                                reading = self.queue.recv() => match reading {
                                    Some(reading) => InFlight { reading, redeliveries: 0 },
                                    None => {
                                        debug!("Publish queue closed");
                                        break;
                                    }
                                },
                                e = self.transport.drive() => {
                                    warn!(error = %e, "Broker connection lost");
                                    self.session_lost();
                                    continue;
                                }
                                _ = shutdown_requested(&mut shutdown) => break,
                            }
                        }
                    };

                    if let Some(unsent) = self.deliver(in_flight, &mut shutdown).await {
                        self.in_flight = Some(unsent);
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_connected(&mut self) {
        self.backoff.reset();
        self.transition(ConnectionState::Connected);

        if let Err(e) = self.publish_attributes().await {
            warn!(error = %e, class = %e.class(), "Failed to publish device attributes");
            self.session_lost();
        }
    }

    /// Connected → Disconnected, then wait out a backoff delay before the
    /// next handshake. The backoff was reset on connect, so the first delay
    /// after a loss is the base delay.
    fn session_lost(&mut self) {
        self.transition(ConnectionState::Disconnected);

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        debug!(
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        self.transition(ConnectionState::Backoff {
            attempt,
            until: Instant::now() + delay,
        });
    }

    fn on_connect_failed(&mut self, error: PublisherError) {
        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        warn!(
            error = %error,
            class = %error.class(),
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            "Broker connect failed"
        );
        self.transition(ConnectionState::Backoff {
            attempt,
            until: Instant::now() + delay,
        });
    }

    async fn publish_attributes(&mut self) -> Result<(), PublisherError> {
        let Some(attributes) = &self.attributes else {
            return Ok(());
        };
        let payload = serde_json::to_vec(attributes).map_err(npk_common::Error::from)?;

        let topic = self.settings.attributes_topic.clone();
        self.publish(&topic, payload).await
    }

    /// Publish one reading.
    ///
    /// Returns the reading back when shutdown interrupted the attempt.
    async fn deliver(
        &mut self,
        mut in_flight: InFlight,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<InFlight> {
        let timestamp = in_flight.reading.timestamp;
        let payload = match in_flight
            .reading
            .encode_payload(self.settings.include_timestamp)
        {
            Ok(payload) => payload,
            Err(e) => {
                let e = PublisherError::from(e);
                error!(error = %e, class = %e.class(), timestamp, "Dropping unencodable reading");
                self.emit(PublishEvent::Dropped {
                    reading: in_flight.reading,
                    attempts: 0,
                });
                return None;
            }
        };

        let topic = self.settings.telemetry_topic.clone();
        let result = tokio::select! {
            result = self.publish(&topic, payload) => result,
            _ = shutdown_requested(shutdown) => return Some(in_flight),
        };

        match result {
            Ok(()) => {
                debug!(
                    timestamp,
                    redeliveries = in_flight.redeliveries,
                    "Reading published"
                );
                self.emit(PublishEvent::Published { timestamp });
            }
            Err(e) => {
                let requeued = in_flight.redeliveries < self.settings.max_redeliveries;
                warn!(
                    error = %e,
                    class = %e.class(),
                    timestamp,
                    redeliveries = in_flight.redeliveries,
                    requeued,
                    "Reading publish failed"
                );
                self.session_lost();
                self.emit(PublishEvent::PublishFailed {
                    timestamp,
                    requeued,
                });

                if requeued {
                    in_flight.redeliveries += 1;
                    self.in_flight = Some(in_flight);
                } else {
                    let attempts = in_flight.redeliveries + 1;
                    error!(timestamp, attempts, "Reading dropped after redelivery bound");
                    self.emit(PublishEvent::Dropped {
                        reading: in_flight.reading,
                        attempts,
                    });
                }
            }
        }

        None
    }

    /// One bounded publish on the current session.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublisherError> {
        match timeout(
            self.settings.publish_timeout,
            self.transport.publish(topic, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublisherError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(PublisherError::PublishFailed {
                topic: topic.to_string(),
                message: format!("no acknowledgement within {:?}", self.settings.publish_timeout),
            }),
        }
    }

    async fn shutdown(&mut self) {
        if self.state.get().is_connected()
            && timeout(self.settings.publish_timeout, self.transport.disconnect())
                .await
                .is_err()
        {
            warn!("Broker disconnect timed out");
        }
        self.transition(ConnectionState::Disconnected);

        let unsent = usize::from(self.in_flight.is_some()) + self.drain_queue();
        if unsent > 0 {
            warn!(unsent, "Readings left unpublished at shutdown");
        }
        info!("Telemetry publisher stopped");
    }

    fn drain_queue(&mut self) -> usize {
        let mut count = 0;
        while self.queue.try_recv().is_some() {
            count += 1;
        }
        count
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.get();
        if previous == next {
            return;
        }
        self.state.set(next);
        self.emit(PublishEvent::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn emit(&self, event: PublishEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Publish event receiver gone");
            }
        }
    }
}
