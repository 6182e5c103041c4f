//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use npk_common::shutdown_requested;
use npk_modbus::ModbusMaster;
use npk_modbus::serial::SerialStream;
use npk_telemetry::{
    MqttTransport, PublishEvent, PublisherSettings, StateReader, TelemetryPublisher, Transport,
    publish_queue,
};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::args::BridgeArgs;
use crate::config::NpkBridgeConfig;
use crate::error::BridgeError;
use crate::orchestrator::{PollLoop, ReadingSource};
use crate::stats::BridgeStats;

/// Time the loops get to wind down before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Cloneable trigger for a runner's shutdown signal.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Ask every task of the runner to stop.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Owns the poll loop, the publisher and the shutdown signal they share.
///
/// # Example
///
/// ```ignore
/// let mut runner = BridgeRunner::new(config);
/// runner.listen_for_signals();
/// let transport = MqttTransport::new(&runner.config().mqtt);
/// runner.start(master, Some(transport)).await;
/// runner.run().await;
/// ```
pub struct BridgeRunner {
    config: NpkBridgeConfig,
    stats: Arc<BridgeStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    connection: Option<StateReader>,
    tasks: Vec<JoinHandle<()>>,
    signals: Option<JoinHandle<()>>,
}

impl BridgeRunner {
    pub fn new(config: NpkBridgeConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            stats: Arc::new(BridgeStats::new()),
            shutdown_tx: Arc::new(shutdown_tx),
            connection: None,
            tasks: Vec::new(),
            signals: None,
        }
    }

    pub fn config(&self) -> &NpkBridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    /// Broker connection state, once a publisher has been started.
    pub fn connection(&self) -> Option<StateReader> {
        self.connection.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Turn Ctrl+C and SIGTERM into a shutdown request from now on.
    pub fn listen_for_signals(&mut self) {
        if self.signals.is_some() {
            return;
        }
        let handle = self.shutdown_handle();
        self.signals = Some(tokio::spawn(async move {
            wait_for_signal().await;
            handle.trigger();
        }));
    }

    /// Spawn a task that is joined on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Start the publisher on `transport`, poll the sensor once, then start
    /// polling periodically.
    ///
    /// Without a transport readings are only logged (dry run). When shutdown
    /// is requested during the first poll it is cancelled and polling never
    /// starts.
    pub async fn start<S, T>(&mut self, source: S, transport: Option<T>)
    where
        S: ReadingSource + 'static,
        T: Transport + 'static,
    {
        let mut poll_loop = PollLoop::new(
            source,
            self.config.bridge.poll_interval(),
            self.stats.clone(),
        );

        if let Some(transport) = transport {
            let (producer, consumer) = publish_queue(self.config.bridge.queue_capacity);
            let (events_tx, events_rx) = mpsc::unbounded_channel();

            let publisher = TelemetryPublisher::new(
                transport,
                PublisherSettings::from(&self.config.mqtt),
                consumer,
            )
            .with_attributes(self.config.device_attributes())
            .with_events(events_tx);

            self.connection = Some(publisher.state());
            let shutdown = self.shutdown_tx.subscribe();
            self.spawn(publisher.run(shutdown));
            self.spawn(track_publish_events(events_rx, self.stats.clone()));

            poll_loop = poll_loop.with_queue(producer);
        } else {
            info!("Dry run, readings will not be published");
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = poll_loop.startup_poll() => {}
            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown requested during the startup poll");
                return;
            }
        }

        self.spawn(poll_loop.run(shutdown));
    }

    /// Ask every task to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run until Ctrl+C, SIGTERM or [`ShutdownHandle::trigger`], then stop.
    pub async fn run(mut self) {
        self.listen_for_signals();
        let mut shutdown = self.shutdown_tx.subscribe();

        info!(
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        shutdown_requested(&mut shutdown).await;
        self.stop().await;
    }

    /// Signal shutdown, join the tasks and log the statistics.
    pub async fn stop(self) {
        self.shutdown();
        if let Some(signals) = &self.signals {
            signals.abort();
        }

        let mut tasks = self.tasks;
        let joined = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in &mut tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Task ended abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Tasks did not stop in time, aborting"
            );
            for task in &tasks {
                task.abort();
            }
        }

        self.stats.log_summary();
        info!("NPK bridge stopped");
    }
}

async fn track_publish_events(
    mut events: mpsc::UnboundedReceiver<PublishEvent>,
    stats: Arc<BridgeStats>,
) {
    while let Some(event) = events.recv().await {
        stats.record_publish_event(&event);
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        },
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Open the serial line and build the Modbus master.
pub fn open_sensor(config: &NpkBridgeConfig) -> Result<ModbusMaster<SerialStream>, BridgeError> {
    let sensor = &config.sensor;
    let port = npk_modbus::serial::open(sensor).map_err(|e| BridgeError::Serial {
        port: sensor.port.clone(),
        message: e.to_string(),
    })?;
    let master = ModbusMaster::new(port, sensor)?;

    info!(
        port = %sensor.port,
        baud_rate = sensor.baud_rate,
        slave_id = sensor.slave_id,
        registers = master.register_map().register_count(),
        requests = master.register_map().groups().len(),
        "Sensor configured"
    );

    Ok(master)
}

/// Entry point behind the binary: load config, init logging and run in the
/// mode selected by `args`.
pub async fn run_bridge(args: BridgeArgs) -> anyhow::Result<()> {
    let config = NpkBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    npk_common::init_tracing(&config.logging_with_override(args.log_level.as_deref()))
        .context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting npk-bridge"
    );

    let master = open_sensor(&config)?;

    if args.once {
        let reading = master.poll().await.context("Sensor poll failed")?;
        println!("{}", reading.to_payload(config.mqtt.include_timestamp));
        return Ok(());
    }

    let transport = if args.dry_run {
        None
    } else {
        info!(
            host = %config.mqtt.host,
            port = config.mqtt.port,
            client_id = %config.mqtt.client_id(),
            "Publishing to broker"
        );
        Some(MqttTransport::new(&config.mqtt))
    };

    let mut runner = BridgeRunner::new(config);
    runner.listen_for_signals();
    runner.start(master, transport).await;
    runner.run().await;

    Ok(())
}
