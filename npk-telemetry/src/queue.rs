//! Bounded hand-off between the poll loop and the publisher.

use npk_common::Reading;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::EnqueueError;

/// Create a queue holding at most `capacity` readings.
///
/// A capacity of zero is raised to one.
pub fn publish_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (QueueProducer { tx, capacity }, QueueConsumer { rx })
}

/// Producer side, held by the orchestrator.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<Reading>,
    capacity: usize,
}

impl QueueProducer {
    /// Hand a reading to the publisher without waiting.
    ///
    /// On a full queue the new reading is rejected and the queued ones are
    /// left untouched.
    pub fn enqueue(&self, reading: Reading) -> Result<(), EnqueueError> {
        self.tx.try_send(reading).map_err(|e| match e {
            TrySendError::Full(reading) => EnqueueError::QueueFull(reading),
            TrySendError::Closed(reading) => EnqueueError::Closed(reading),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readings currently waiting.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side, owned by the publisher.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<Reading>,
}

impl QueueConsumer {
    /// Next reading in FIFO order; `None` once every producer is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Reading> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Reading> {
        self.rx.try_recv().ok()
    }
}
