//! Scheduler Counters

use std::fmt;

use super::status::RequestStatus;

/// Cumulative scheduler counters
///
/// Plain integers, not atomics: the stack is single-threaded by
/// construction, every mutation happens under `&mut self`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackStats {
    /// Records created by submit
    pub submitted: u64,
    /// Submissions that merged into an existing record
    pub resubmitted: u64,
    /// Records finalized FINISHED
    pub finished: u64,
    /// Records finalized ERROR
    pub failed: u64,
    /// Records finalized EXPIRED
    pub expired: u64,
    /// Records finalized CANCELED
    pub canceled: u64,
    /// Completion callbacks invoked
    pub callbacks_fired: u64,
    /// Largest active set observed
    pub peak_active: u64,
}

impl StackStats {
    pub(crate) fn record_terminal(&mut self, status: RequestStatus) {
        match status {
            RequestStatus::Finished => self.finished += 1,
            RequestStatus::Error => self.failed += 1,
            RequestStatus::Expired => self.expired += 1,
            RequestStatus::Canceled => self.canceled += 1,
            RequestStatus::Waiting | RequestStatus::Active => {}
        }
    }
}

impl fmt::Display for StackStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stack Stats: submitted={} (merged={}), finished={}, failed={}, expired={}, canceled={}, callbacks={}, peak_active={}",
            self.submitted,
            self.resubmitted,
            self.finished,
            self.failed,
            self.expired,
            self.canceled,
            self.callbacks_fired,
            self.peak_active
        )
    }
}
