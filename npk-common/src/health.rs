//! Failure classification shared by the poll and publish loops.
//!
//! The observability layer only needs to tell "momentarily unreachable"
//! apart from "malfunctioning"; every error kind in the bridge maps onto
//! one of these two classes.

use serde::{Deserialize, Serialize};

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// The peer did not answer or the line/network misbehaved; the next
    /// cycle is expected to succeed.
    Transient,
    /// The peer answered, but with an error or invalid data.
    Fault,
}

impl FailureClass {
    /// Return the string name for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Fault => "fault",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
