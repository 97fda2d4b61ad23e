//! Request Lifecycle Statuses

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request record statuses
///
/// Terminal statuses are absorbing: the scheduler never moves a record out
/// of one, it only keeps it inspectable until the caller dequeues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    /// Queued for admission, not attached to the engine
    Waiting,

    /// Attached to the engine and executing
    Active,

    /// Terminal: engine reported completion with result code 0
    Finished,

    /// Terminal: dequeued or deliberately canceled before completion
    Canceled,

    /// Terminal: timeout budget elapsed before completion
    Expired,

    /// Terminal: engine reported completion with a non-zero result code
    Error,
}

impl RequestStatus {
    /// Check if this is a terminal status (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Waiting | RequestStatus::Active)
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Waiting => "WAITING",
            RequestStatus::Active => "ACTIVE",
            RequestStatus::Finished => "FINISHED",
            RequestStatus::Canceled => "CANCELED",
            RequestStatus::Expired => "EXPIRED",
            RequestStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
