//! Error types for the telemetry publisher.

use npk_common::{FailureClass, Reading};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors reported by a [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Broker rejected the handshake.
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Network-level failure (DNS, TCP, TLS, keepalive).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Broker closed the session.
    #[error("Broker closed the connection")]
    Closed,

    /// Publish attempted without a session.
    #[error("Not connected")]
    NotConnected,
}

/// Errors raised by the publisher session loop.
///
/// None of them is fatal: connect failures drive backoff, publish failures
/// drive a reconnect.
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Publish to '{topic}' failed: {message}")]
    PublishFailed { topic: String, message: String },

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] npk_common::Error),
}

impl PublisherError {
    pub fn class(&self) -> FailureClass {
        match self {
            PublisherError::ConnectFailed(_) | PublisherError::PublishFailed { .. } => {
                FailureClass::Transient
            }
            PublisherError::Encode(_) => FailureClass::Fault,
        }
    }
}

/// Rejected hand-off to the publisher. The reading is returned to the caller.
#[derive(Error, Debug, PartialEq)]
pub enum EnqueueError {
    #[error("Publish queue full")]
    QueueFull(Reading),

    #[error("Publisher is gone")]
    Closed(Reading),
}

impl EnqueueError {
    pub fn into_reading(self) -> Reading {
        match self {
            EnqueueError::QueueFull(reading) | EnqueueError::Closed(reading) => reading,
        }
    }
}
