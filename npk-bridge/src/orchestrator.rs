//! Poll loop: reads the sensor on a fixed period and hands readings to the publisher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use npk_common::{FailureClass, Reading, shutdown_requested};
use npk_modbus::{AdapterError, ModbusMaster};
use npk_telemetry::{EnqueueError, QueueProducer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::stats::BridgeStats;

/// Anything that can produce a [`Reading`] on demand.
pub trait ReadingSource: Send + Sync {
    fn read(&self) -> impl Future<Output = Result<Reading, AdapterError>> + Send;
}

impl<T> ReadingSource for ModbusMaster<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn read(&self) -> impl Future<Output = Result<Reading, AdapterError>> + Send {
        self.poll()
    }
}

/// What became of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Reading handed to the publisher.
    Enqueued,
    /// Reading logged only (dry run).
    Logged,
    /// Queue was full; the new reading was discarded.
    Backpressure,
    /// Publisher is gone; the reading was discarded.
    Discarded,
    /// Sensor poll failed.
    Failed(FailureClass),
}

/// Drives the poll → enqueue cycle.
pub struct PollLoop<S> {
    source: S,
    queue: Option<QueueProducer>,
    interval: Duration,
    stats: Arc<BridgeStats>,
}

impl<S: ReadingSource> PollLoop<S> {
    /// Poll loop without a publisher; readings are only logged.
    pub fn new(source: S, interval: Duration, stats: Arc<BridgeStats>) -> Self {
        Self {
            source,
            queue: None,
            interval,
            stats,
        }
    }

    /// Hand readings to the publisher through `queue`.
    pub fn with_queue(mut self, queue: QueueProducer) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Poll once and route the result. Never waits on the publisher.
    pub async fn poll_once(&self) -> PollOutcome {
        let reading = match self.source.read().await {
            Ok(reading) => reading,
            Err(e) => return self.on_poll_error(&e),
        };

        self.stats.record_reading();
        info!(
            nitrogen = reading.nitrogen,
            phosphorus = reading.phosphorus,
            potassium = reading.potassium,
            registers = reading.raw_registers.len(),
            "Sensor reading"
        );

        let Some(queue) = &self.queue else {
            info!(payload = %reading.to_payload(false), "Dry run, reading not published");
            return PollOutcome::Logged;
        };

        match queue.enqueue(reading) {
            Ok(()) => {
                debug!(queued = queue.len(), "Reading enqueued");
                PollOutcome::Enqueued
            }
            Err(EnqueueError::QueueFull(dropped)) => {
                self.stats.record_backpressure();
                warn!(
                    timestamp = dropped.timestamp,
                    capacity = queue.capacity(),
                    "Publish queue full, dropping newest reading"
                );
                PollOutcome::Backpressure
            }
            Err(EnqueueError::Closed(dropped)) => {
                warn!(timestamp = dropped.timestamp, "Publisher stopped, reading discarded");
                PollOutcome::Discarded
            }
        }
    }

    fn on_poll_error(&self, e: &AdapterError) -> PollOutcome {
        let class = e.class();
        self.stats.record_sensor_error(class);

        match class {
            FailureClass::Transient => warn!(class = %class, error = %e, "Sensor poll failed"),
            FailureClass::Fault => error!(class = %class, error = %e, "Sensor poll failed"),
        }
        PollOutcome::Failed(class)
    }

    /// Startup poll; the outcome is reported but never fatal.
    pub async fn startup_poll(&self) -> PollOutcome {
        let outcome = self.poll_once().await;
        match outcome {
            PollOutcome::Failed(class) => {
                warn!(class = %class, "Sensor did not answer at startup, polling continues")
            }
            _ => info!("Sensor answered at startup"),
        }
        outcome
    }

    /// Poll every `interval` until shutdown, starting one interval from now.
    ///
    /// Shutdown also cancels an in-flight poll; the serial line is released
    /// with it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            "Poll loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            tokio::select! {
                _ = self.poll_once() => {}
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Poll cancelled by shutdown");
                    break;
                }
            }
        }

        info!("Poll loop stopped");
    }
}
