//! Request Record Types
//!
//! Bookkeeping for one tracked transfer: the scheduler-private record and
//! the sanitized copies handed back to callers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::handle::{TransferHandle, TransferToken};

use super::status::RequestStatus;

/// Completion callback, invoked with the owning handle when its record
/// reaches a terminal status. `FnOnce` plus the finalizer's `take()` make
/// the at-most-once guarantee structural.
pub type TransferCallback = Box<dyn FnOnce(&TransferHandle) + Send>;

/// Options captured at submission
///
/// These are the only fields a re-submission may change on an existing
/// record; `None` leaves the current value in place.
#[derive(Default)]
pub struct SubmitOptions {
    /// Completion callback
    pub callback: Option<TransferCallback>,
    /// Timeout budget; the configured default applies when unset
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the completion callback
    pub fn with_callback(
        mut self,
        callback: impl FnOnce(&TransferHandle) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// One tracked transfer inside the scheduler
pub(crate) struct RequestRecord {
    pub token: TransferToken,
    pub handle: TransferHandle,
    pub status: RequestStatus,
    /// Wall-clock submission time (millis)
    pub submitted_at_ms: i64,
    /// Monotonic submission time for deadline math
    pub submitted: Instant,
    /// Wall-clock time of the terminal transition (millis)
    pub removed_at_ms: Option<i64>,
    /// Timeout budget
    pub timeout: Duration,
    /// Duration from submission to the terminal transition
    pub elapsed: Option<Duration>,
    /// Buffered response body, taken from the handle on FINISHED
    pub body: Option<Vec<u8>>,
    /// Engine result code
    pub code: Option<i32>,
    /// Engine diagnostic info pulled at finalization
    pub diagnostics: Option<serde_json::Value>,
    /// Terminal error text
    pub error: Option<String>,
    /// Pending completion callback
    pub callback: Option<TransferCallback>,
}

impl RequestRecord {
    /// Create a new record in WAITING status
    pub fn new(
        handle: &TransferHandle,
        timeout: Duration,
        callback: Option<TransferCallback>,
    ) -> Self {
        Self {
            token: handle.token(),
            handle: Arc::clone(handle),
            status: RequestStatus::Waiting,
            submitted_at_ms: chrono::Utc::now().timestamp_millis(),
            submitted: Instant::now(),
            removed_at_ms: None,
            timeout,
            elapsed: None,
            body: None,
            code: None,
            diagnostics: None,
            error: None,
            callback,
        }
    }

    /// Whether the timeout budget has elapsed as of `now`
    pub fn is_overdue(&self, now: Instant) -> bool {
        !self.status.is_terminal() && now.duration_since(self.submitted) >= self.timeout
    }

    /// Sanitized copy for listings: the buffered body is withheld
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            token: self.token,
            name: self.handle.name().to_string(),
            status: self.status,
            submitted_at_ms: self.submitted_at_ms,
            removed_at_ms: self.removed_at_ms,
            timeout_ms: self.timeout.as_millis() as u64,
            elapsed_ms: self.elapsed.map(|d| d.as_millis() as u64),
            code: self.code,
            error: self.error.clone(),
            diagnostics: self.diagnostics.clone(),
            body: None,
        }
    }

    /// Consuming copy for dequeue: the buffered body travels with it
    pub fn into_snapshot(self) -> RecordSnapshot {
        let mut snapshot = self.snapshot();
        snapshot.body = self.body;
        snapshot
    }
}

/// Public, serializable copy of a record
///
/// `body` is withheld by listing snapshots and carried only by the copy
/// returned from dequeue.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSnapshot {
    pub token: TransferToken,
    pub name: String,
    pub status: RequestStatus,
    pub submitted_at_ms: i64,
    pub removed_at_ms: Option<i64>,
    pub timeout_ms: u64,
    pub elapsed_ms: Option<u64>,
    pub code: Option<i32>,
    pub error: Option<String>,
    pub diagnostics: Option<serde_json::Value>,
    pub body: Option<Vec<u8>>,
}

impl fmt::Display for RecordSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request[{}] {} status={} timeout_ms={}",
            self.token, self.name, self.status, self.timeout_ms
        )?;
        if let Some(elapsed_ms) = self.elapsed_ms {
            write!(f, " elapsed_ms={}", elapsed_ms)?;
        }
        if let Some(code) = self.code {
            write!(f, " code={}", code)?;
        }
        Ok(())
    }
}
