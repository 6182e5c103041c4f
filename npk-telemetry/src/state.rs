//! Publisher connection state.
//!
//! The publisher holds the only [`StateCell`]; everyone else observes it
//! through cloned [`StateReader`]s.

use std::fmt;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

/// Session state of the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting after the `attempt`-th consecutive failed handshake.
    Backoff { attempt: u32, until: Instant },
}

impl ConnectionState {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff { .. } => "backoff",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Backoff { attempt, until } => {
                let remaining = until.saturating_duration_since(Instant::now());
                write!(f, "backoff(attempt {}, {:?} left)", attempt, remaining)
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Single-writer side of the state.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    /// New cell starting in `Disconnected`.
    pub fn new() -> (Self, StateReader) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Self { tx }, StateReader { rx })
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Move to `next`, logging the transition.
    pub fn set(&self, next: ConnectionState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            info!(from = previous.as_str(), to = %next, "Connection state changed");
        }
    }
}

/// Read-only view of the publisher state.
#[derive(Debug, Clone)]
pub struct StateReader {
    rx: watch::Receiver<ConnectionState>,
}

impl StateReader {
    pub fn get(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.get().is_connected()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        self.rx.wait_for(|state| predicate(state)).await.ok().map(|s| *s)
    }
}
