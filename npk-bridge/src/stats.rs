//! Runtime statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use npk_common::FailureClass;
use npk_telemetry::{ConnectionState, PublishEvent};
use serde::Serialize;
use tracing::info;

/// Counters shared by the poll loop and the publish event tracker.
#[derive(Debug)]
pub struct BridgeStats {
    started_at: DateTime<Utc>,
    start_time: Instant,
    readings: AtomicU64,
    sensor_transient: AtomicU64,
    sensor_faults: AtomicU64,
    backpressure_drops: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    redelivery_drops: AtomicU64,
    connects: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started_at: String,
    pub uptime_secs: u64,
    pub readings: u64,
    pub sensor_transient: u64,
    pub sensor_faults: u64,
    pub backpressure_drops: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub redelivery_drops: u64,
    pub connects: u64,
}

impl StatsSnapshot {
    /// Successful polls as a percentage of all polls.
    pub fn poll_success_rate(&self) -> f64 {
        let total = self.readings + self.sensor_transient + self.sensor_faults;
        if total == 0 {
            100.0
        } else {
            (self.readings as f64 / total as f64) * 100.0
        }
    }

    /// Readings lost to backpressure or the redelivery bound.
    pub fn dropped(&self) -> u64 {
        self.backpressure_drops + self.redelivery_drops
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start_time: Instant::now(),
            readings: AtomicU64::new(0),
            sensor_transient: AtomicU64::new(0),
            sensor_faults: AtomicU64::new(0),
            backpressure_drops: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            redelivery_drops: AtomicU64::new(0),
            connects: AtomicU64::new(0),
        }
    }

    pub fn record_reading(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_error(&self, class: FailureClass) {
        let counter = match class {
            FailureClass::Transient => &self.sensor_transient,
            FailureClass::Fault => &self.sensor_faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a publisher outcome into the counters.
    pub fn record_publish_event(&self, event: &PublishEvent) {
        match event {
            PublishEvent::Published { .. } => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            PublishEvent::PublishFailed { .. } => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
            }
            PublishEvent::Dropped { .. } => {
                self.redelivery_drops.fetch_add(1, Ordering::Relaxed);
            }
            PublishEvent::StateChanged {
                to: ConnectionState::Connected,
                ..
            } => {
                self.connects.fetch_add(1, Ordering::Relaxed);
            }
            PublishEvent::StateChanged { .. } => {}
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at.to_rfc3339(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            readings: self.readings.load(Ordering::Relaxed),
            sensor_transient: self.sensor_transient.load(Ordering::Relaxed),
            sensor_faults: self.sensor_faults.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            redelivery_drops: self.redelivery_drops.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }

    /// Log the shutdown summary.
    pub fn log_summary(&self) {
        let stats = self.snapshot();
        info!(
            started_at = %stats.started_at,
            uptime_secs = stats.uptime_secs,
            readings = stats.readings,
            poll_success_rate = %format!("{:.1}%", stats.poll_success_rate()),
            sensor_transient = stats.sensor_transient,
            sensor_faults = stats.sensor_faults,
            published = stats.published,
            publish_failures = stats.publish_failures,
            dropped = stats.dropped(),
            connects = stats.connects,
            "Bridge statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npk_common::Reading;

    #[test]
    fn test_counters() {
        let stats = BridgeStats::new();
        stats.record_reading();
        stats.record_reading();
        stats.record_reading();
        stats.record_sensor_error(FailureClass::Transient);
        stats.record_backpressure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.readings, 3);
        assert_eq!(snapshot.sensor_transient, 1);
        assert_eq!(snapshot.sensor_faults, 0);
        assert_eq!(snapshot.poll_success_rate(), 75.0);
        assert_eq!(snapshot.dropped(), 1);
    }

    #[test]
    fn test_publish_events() {
        let stats = BridgeStats::new();
        stats.record_publish_event(&PublishEvent::StateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
        });
        stats.record_publish_event(&PublishEvent::StateChanged {
            from: ConnectionState::Connected,
            to: ConnectionState::Disconnected,
        });
        stats.record_publish_event(&PublishEvent::Published { timestamp: 1 });
        stats.record_publish_event(&PublishEvent::PublishFailed {
            timestamp: 2,
            requeued: false,
        });
        stats.record_publish_event(&PublishEvent::Dropped {
            reading: Reading::new(1, 2, 3, vec![1, 2, 3]),
            attempts: 4,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connects, 1);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.redelivery_drops, 1);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(BridgeStats::new().snapshot().poll_success_rate(), 100.0);
    }
}
