//! Transfer Stack
//!
//! Orchestrates admission, polling and finalization for tracked transfers.
//! This is the central component that drives status transitions.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::StackConfig;
use crate::engine::{EngineEvent, MultiEngine};
use crate::handle::{TransferHandle, TransferToken};

use super::error::StackError;
use super::record::{RecordSnapshot, RequestRecord, SubmitOptions};
use super::stats::StackStats;
use super::status::RequestStatus;

/// Upper bound on poll-loop passes per refresh call.
/// A pass only repeats after it finalized something, so ordinary loads take
/// one or two passes; the bound caps completion storms.
const MAX_REFRESH_PASSES: usize = 100; // Safety limit

/// Requested outcome handed to the finalizer. Unset fields are filled from
/// the handle.
struct Outcome {
    status: RequestStatus,
    code: Option<i32>,
    error: Option<String>,
}

impl Outcome {
    /// Engine completion: code 0 finishes, anything else is a per-transfer
    /// error
    fn done(code: i32) -> Self {
        let status = if code == 0 {
            RequestStatus::Finished
        } else {
            RequestStatus::Error
        };
        Self {
            status,
            code: Some(code),
            error: None,
        }
    }

    fn expired(budget: Duration) -> Self {
        Self {
            status: RequestStatus::Expired,
            code: None,
            error: Some(format!(
                "transfer timed out after {}ms",
                budget.as_millis()
            )),
        }
    }

    fn canceled() -> Self {
        Self {
            status: RequestStatus::Canceled,
            code: None,
            error: None,
        }
    }
}

/// Transfer Stack - bounded-concurrency scheduler over one multi-transfer
/// engine
///
/// Owns every piece of scheduling state; create one stack per engine. All
/// operations take `&mut self`, so embedders with real threads wrap the
/// stack in `Arc<Mutex<...>>` and the borrow checker enforces the serialized
/// access the collection invariants require.
pub struct TransferStack<E: MultiEngine> {
    engine: E,
    config: StackConfig,
    /// Identity index
    records: BTreeMap<TransferToken, RequestRecord>,
    /// Tracked tokens in submission order, kept until dequeue
    order: Vec<TransferToken>,
    /// Admission queue, FIFO
    pending: VecDeque<TransferToken>,
    /// Attached transfers, most recently activated last
    active: Vec<TransferToken>,
    stats: StackStats,
}

impl<E: MultiEngine> TransferStack<E> {
    /// Create a stack with explicit configuration
    pub fn new(engine: E, config: StackConfig) -> Self {
        Self {
            engine,
            config,
            records: BTreeMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            active: Vec::new(),
            stats: StackStats::default(),
        }
    }

    /// Create a stack with default configuration
    pub fn with_defaults(engine: E) -> Self {
        Self::new(engine, StackConfig::default())
    }

    // ============================================================
    // REGISTRY
    // ============================================================

    /// Track a handle for execution.
    ///
    /// Returns `Ok(None)` when the handle has no usable transfer resource.
    /// A new identity is queued WAITING and one non-clean poll pass runs, so
    /// the returned status may already be ACTIVE, or terminal for immediate
    /// completions. Re-submitting a tracked identity merges callback and
    /// timeout only; status, clocks and results are untouched.
    pub fn submit(
        &mut self,
        handle: &TransferHandle,
        options: SubmitOptions,
    ) -> Result<Option<RequestStatus>, StackError> {
        if !handle.is_open() {
            debug!(name = handle.name(), "submit refused: transfer resource not open");
            return Ok(None);
        }

        let token = handle.token();
        if let Some(record) = self.records.get_mut(&token) {
            if let Some(callback) = options.callback {
                record.callback = Some(callback);
            }
            if let Some(timeout) = options.timeout {
                record.timeout = timeout;
            }
            self.stats.resubmitted += 1;
            debug!(token = %token, "submit merged into existing record");
        } else {
            let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());
            let record = RequestRecord::new(handle, timeout, options.callback);
            self.pending.push_back(token);
            self.records.insert(token, record);
            self.order.push(token);
            self.stats.submitted += 1;
            debug!(
                token = %token,
                name = handle.name(),
                timeout_ms = timeout.as_millis() as u64,
                "submitted"
            );
        }

        self.refresh(false)?;
        Ok(self.records.get(&token).map(|r| r.status))
    }

    /// Dequeue a handle, canceling it first if still live.
    ///
    /// `wait` blocks up to the configured wait budget for the record to
    /// settle on its own before any forced cancel. Returns the terminal
    /// record copy, body included; the identity is forgotten afterwards, so
    /// a second call returns `Ok(None)`.
    pub fn remove(
        &mut self,
        handle: &TransferHandle,
        wait: bool,
    ) -> Result<Option<RecordSnapshot>, StackError> {
        let token = handle.token();
        if !self.records.contains_key(&token) {
            return Ok(None);
        }

        if wait {
            let budget = self.config.wait_timeout();
            self.wait(Some(handle), budget)?;
        }

        self.refresh(false)?;

        let still_live = self
            .records
            .get(&token)
            .map(|r| !r.status.is_terminal())
            .unwrap_or(false);
        if still_live {
            self.finalize(token, Outcome::canceled())?;
        }

        let Some(record) = self.records.remove(&token) else {
            return Ok(None);
        };
        self.order.retain(|t| *t != token);
        debug!(token = %token, status = %record.status, "dequeued");
        Ok(Some(record.into_snapshot()))
    }

    /// Current status for a handle, without driving the engine
    pub fn status(&self, handle: &TransferHandle) -> Option<RequestStatus> {
        self.records.get(&handle.token()).map(|r| r.status)
    }

    /// Internal key for a tracked handle
    pub fn lookup(&self, handle: &TransferHandle) -> Option<TransferToken> {
        let token = handle.token();
        self.records.contains_key(&token).then_some(token)
    }

    /// Whether the handle is currently tracked
    pub fn is_tracked(&self, handle: &TransferHandle) -> bool {
        self.lookup(handle).is_some()
    }

    /// Sanitized copies of every record, in submission order.
    /// Raw handles and buffered bodies are withheld.
    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        self.order
            .iter()
            .filter_map(|t| self.records.get(t))
            .map(|r| r.snapshot())
            .collect()
    }

    // ============================================================
    // ADMISSION
    // ============================================================

    /// Promote a pending record into the active set.
    ///
    /// No token pops the queue head (FIFO); an explicit token is pulled from
    /// wherever it sits in the queue. Already-active tokens are a no-op
    /// success. Returns false when nothing is eligible. The concurrency
    /// limit is enforced by the poll loop, not here: an explicit call is
    /// allowed to overshoot it.
    pub fn activate(&mut self, token: Option<TransferToken>) -> Result<bool, StackError> {
        let position = match token {
            Some(t) => {
                if self.active.contains(&t) {
                    return Ok(true);
                }
                match self.pending.iter().position(|p| *p == t) {
                    Some(position) => position,
                    None => return Ok(false),
                }
            }
            None => {
                if self.pending.is_empty() {
                    return Ok(false);
                }
                0
            }
        };

        let Some(token) = self.pending.get(position).copied() else {
            return Ok(false);
        };

        self.ensure_engine_open()?;
        let Some(record) = self.records.get_mut(&token) else {
            // Defensive: a queue entry without a record is dropped on sight
            warn!(token = %token, "pending token without a record");
            self.pending.remove(position);
            return Ok(false);
        };
        // Attach first so a failure leaves the record pending and WAITING
        self.engine.attach(&record.handle)?;
        record.status = RequestStatus::Active;

        self.pending.remove(position);
        self.active.push(token);
        if self.active.len() as u64 > self.stats.peak_active {
            self.stats.peak_active = self.active.len() as u64;
        }
        debug!(token = %token, active = self.active.len(), "activated");
        Ok(true)
    }

    /// Demote an active record back to the front of the pending queue.
    ///
    /// No token pops the most recently activated (LIFO). A token that is
    /// tracked and already waiting is a no-op success.
    pub fn deactivate(&mut self, token: Option<TransferToken>) -> Result<bool, StackError> {
        let token = match token {
            Some(t) => {
                if !self.active.contains(&t) {
                    let already_waiting = self
                        .records
                        .get(&t)
                        .map(|r| r.status == RequestStatus::Waiting)
                        .unwrap_or(false);
                    return Ok(already_waiting);
                }
                t
            }
            None => match self.active.last().copied() {
                Some(t) => t,
                None => return Ok(false),
            },
        };

        if self.engine.is_open() {
            self.engine.detach(token)?;
        }
        self.active.retain(|t| *t != token);
        self.pending.push_front(token);
        if let Some(record) = self.records.get_mut(&token) {
            record.status = RequestStatus::Waiting;
        }
        debug!(token = %token, active = self.active.len(), "deactivated");
        Ok(true)
    }

    // ============================================================
    // POLL LOOP
    // ============================================================

    /// Drive the engine and settle what it reports.
    ///
    /// One pass admits from pending, steps the engine until it has no more
    /// immediate work, then, on a clean pass or whenever the engine reports
    /// nothing running, drains completion events and expires overdue
    /// records. A pass that finalized anything is followed by another clean
    /// pass so freshly admitted replacements also get driven, up to a
    /// bounded number of passes. Returns whether the engine still has
    /// transfers running.
    ///
    /// With nothing live, the engine context is released and recreated on
    /// next demand; context identity is not stable across idle periods.
    pub fn refresh(&mut self, clean: bool) -> Result<bool, StackError> {
        let mut clean = clean;
        let mut running = false;

        for pass in 0..MAX_REFRESH_PASSES {
            if self.pending.is_empty() && self.active.is_empty() {
                if self.engine.is_open() {
                    self.engine.close();
                    debug!("engine context released");
                }
                return Ok(false);
            }

            loop {
                if self.active.len() >= self.config.concurrency_limit {
                    break;
                }
                if !self.activate(None)? {
                    break;
                }
            }

            self.ensure_engine_open()?;
            let mut report = self.engine.step()?;
            while report.more_work {
                report = self.engine.step()?;
            }
            running = report.running > 0;

            if !clean && running {
                return Ok(true);
            }

            let mut finalized = 0usize;

            while let Some(event) = self.engine.next_event() {
                match event {
                    EngineEvent::Done { token, code } => {
                        self.finalize(token, Outcome::done(code))?;
                        finalized += 1;
                    }
                    EngineEvent::Stray { token, kind } => {
                        // Events not yet read stay queued with the engine
                        // and are drained by the next refresh.
                        error!(token = %token, kind, "unexpected engine event");
                        return Err(StackError::Protocol { token, kind });
                    }
                }
            }

            let now = Instant::now();
            let overdue: Vec<(TransferToken, Duration)> = self
                .records
                .values()
                .filter(|r| r.is_overdue(now))
                .map(|r| (r.token, r.timeout))
                .collect();
            for (token, budget) in overdue {
                self.finalize(token, Outcome::expired(budget))?;
                finalized += 1;
            }

            if finalized == 0 {
                return Ok(running);
            }
            debug!(pass = pass + 1, finalized, "refresh pass settled records");
            clean = true;
        }

        warn!(
            passes = MAX_REFRESH_PASSES,
            "refresh hit the pass limit with work left"
        );
        Ok(running)
    }

    fn ensure_engine_open(&mut self) -> Result<(), StackError> {
        if !self.engine.is_open() {
            self.engine.open()?;
            debug!("engine context created");
        }
        Ok(())
    }

    // ============================================================
    // FINALIZER
    // ============================================================

    /// Settle one record into a terminal status and fire its callback.
    ///
    /// Unknown and already-terminal tokens are ignored. The callback is
    /// taken out of the record before it runs, and it runs last, after the
    /// record is terminal, detached and its freed slot refilled; a panicking
    /// callback unwinds out of the driving refresh call without corrupting
    /// scheduling state.
    fn finalize(&mut self, token: TransferToken, outcome: Outcome) -> Result<(), StackError> {
        let Outcome { status, code, error } = outcome;

        let Some(record) = self.records.get_mut(&token) else {
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        match status {
            RequestStatus::Finished => {
                if record.body.is_none() {
                    record.body = record.handle.take_body();
                }
            }
            RequestStatus::Error => {
                record.error = error
                    .or_else(|| record.handle.error_text())
                    .or_else(|| code.map(|c| format!("engine result code {}", c)));
            }
            RequestStatus::Expired => {
                record.error = error;
            }
            // CANCELED carries no error; the body stays with the handle
            _ => {}
        }
        if record.diagnostics.is_none() {
            record.diagnostics = record.handle.diagnostics();
        }
        if record.code.is_none() {
            record.code = code;
        }
        record.elapsed = Some(record.submitted.elapsed());
        record.removed_at_ms = Some(chrono::Utc::now().timestamp_millis());
        record.status = status;

        let handle = record.handle.clone();
        let callback = record.callback.take();
        let elapsed_ms = record.elapsed.map(|d| d.as_millis() as u64).unwrap_or(0);

        // It should only sit in one collection, but check both for safety
        self.pending.retain(|t| *t != token);
        self.active.retain(|t| *t != token);
        if self.engine.is_open() {
            self.engine.detach(token)?;
        }
        self.stats.record_terminal(status);
        info!(token = %token, status = %status, elapsed_ms, "finalized");

        // Refill the freed slot right away
        if self.active.len() < self.config.concurrency_limit {
            self.activate(None)?;
        }

        if let Some(callback) = callback {
            self.stats.callbacks_fired += 1;
            callback(&handle);
        }
        Ok(())
    }

    // ============================================================
    // WAITER
    // ============================================================

    /// Block until a handle settles, or everything drains.
    ///
    /// `handle = None` waits for the whole stack to go idle and succeeds
    /// immediately when it already is. Waiting on an untracked handle fails
    /// immediately. Returns true when the condition was met before the
    /// deadline; false on deadline, which never cancels anything - the
    /// record is left exactly as the last poll pass left it. A timeout too
    /// large for the clock to represent waits with no deadline at all.
    pub fn wait(
        &mut self,
        handle: Option<&TransferHandle>,
        timeout: Duration,
    ) -> Result<bool, StackError> {
        let deadline = Instant::now().checked_add(timeout);
        let slice = self.config.wait_slice();

        if let Some(h) = handle {
            match self.records.get(&h.token()) {
                None => {
                    debug!(name = h.name(), "wait on untracked handle");
                    return Ok(false);
                }
                Some(r) if r.status.is_terminal() => return Ok(true),
                Some(_) => {}
            }
        }

        loop {
            self.refresh(true)?;

            let satisfied = match handle {
                Some(h) => self
                    .records
                    .get(&h.token())
                    .map(|r| r.status.is_terminal())
                    .unwrap_or(true),
                None => self.pending.is_empty() && self.active.is_empty(),
            };
            if satisfied {
                return Ok(true);
            }

            let now = Instant::now();
            if deadline.map(|d| now >= d).unwrap_or(false) {
                debug!("wait deadline passed");
                return Ok(false);
            }

            let nap = deadline.map(|d| slice.min(d - now)).unwrap_or(slice);
            if self.active.is_empty() || !self.engine.is_open() {
                // Nothing attached to select on; plain idle retry
                std::thread::sleep(nap);
            } else {
                self.engine.wait_ready(nap)?;
            }
        }
    }

    // ============================================================
    // CONFIGURATION & DIAGNOSTICS
    // ============================================================

    /// Current admission cap
    pub fn concurrency_limit(&self) -> usize {
        self.config.concurrency_limit
    }

    /// Change the admission cap.
    ///
    /// Takes effect on future admissions only; already-active transfers are
    /// never force-deactivated.
    pub fn set_concurrency_limit(&mut self, limit: usize) {
        debug!(limit, "concurrency limit changed");
        self.config.concurrency_limit = limit;
    }

    /// Records queued for admission
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records attached to the engine
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Tracked records, terminal ones included
    pub fn tracked_len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is queued or executing
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// Cumulative counters
    pub fn stats(&self) -> StackStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimController, SimEngine, SimTransfer};
    use std::sync::Arc;

    fn make_stack(limit: usize) -> (TransferStack<SimEngine>, SimController) {
        let engine = SimEngine::new();
        let ctl = engine.controller();
        let config = StackConfig {
            concurrency_limit: limit,
            ..StackConfig::default()
        };
        (TransferStack::new(engine, config), ctl)
    }

    fn make_transfer(ctl: &SimController, name: &str) -> (Arc<SimTransfer>, TransferHandle) {
        let t = ctl.transfer(name);
        let handle: TransferHandle = t.clone();
        (t, handle)
    }

    #[test]
    fn test_submit_refuses_closed_handle() {
        let (mut stack, ctl) = make_stack(2);
        let (t, handle) = make_transfer(&ctl, "closed");
        t.close_resource();

        let status = stack.submit(&handle, SubmitOptions::new()).unwrap();
        assert!(status.is_none());
        assert!(!stack.is_tracked(&handle));
        assert_eq!(stack.tracked_len(), 0);
    }

    #[test]
    fn test_submit_admits_until_limit() {
        let (mut stack, ctl) = make_stack(2);
        let (_ta, ha) = make_transfer(&ctl, "a");
        let (_tb, hb) = make_transfer(&ctl, "b");
        let (_tc, hc) = make_transfer(&ctl, "c");

        assert_eq!(
            stack.submit(&ha, SubmitOptions::new()).unwrap(),
            Some(RequestStatus::Active)
        );
        assert_eq!(
            stack.submit(&hb, SubmitOptions::new()).unwrap(),
            Some(RequestStatus::Active)
        );
        assert_eq!(
            stack.submit(&hc, SubmitOptions::new()).unwrap(),
            Some(RequestStatus::Waiting)
        );

        assert_eq!(stack.active_len(), 2);
        assert_eq!(stack.pending_len(), 1);
    }

    #[test]
    fn test_resubmit_merges_without_reset() {
        let (mut stack, ctl) = make_stack(1);
        let (_ta, ha) = make_transfer(&ctl, "a");

        stack.submit(&ha, SubmitOptions::new()).unwrap();
        let before = stack.snapshot().remove(0);

        let status = stack
            .submit(&ha, SubmitOptions::new().with_timeout(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(status, Some(RequestStatus::Active));
        assert_eq!(stack.tracked_len(), 1);
        assert_eq!(stack.stats().resubmitted, 1);

        let after = stack.snapshot().remove(0);
        assert_eq!(after.timeout_ms, 60_000);
        assert_eq!(after.submitted_at_ms, before.submitted_at_ms);
        assert_eq!(after.status, before.status);
    }

    #[test]
    fn test_snapshot_order_and_fields() {
        let (mut stack, ctl) = make_stack(1);
        let (_ta, ha) = make_transfer(&ctl, "a");
        let (_tb, hb) = make_transfer(&ctl, "b");

        stack.submit(&ha, SubmitOptions::new()).unwrap();
        stack.submit(&hb, SubmitOptions::new()).unwrap();

        let snapshots = stack.snapshot();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "a");
        assert_eq!(snapshots[0].status, RequestStatus::Active);
        assert_eq!(snapshots[1].name, "b");
        assert_eq!(snapshots[1].status, RequestStatus::Waiting);
        assert!(snapshots[0].token < snapshots[1].token);

        let drift = (chrono::Utc::now().timestamp_millis() - snapshots[0].submitted_at_ms).abs();
        assert!(drift < 1_000);
        assert!(snapshots.iter().all(|s| s.body.is_none()));
    }

    #[test]
    fn test_snapshot_keeps_submission_order() {
        let (mut stack, ctl) = make_stack(0);
        let (_ta, ha) = make_transfer(&ctl, "minted-first");
        let (_tb, hb) = make_transfer(&ctl, "minted-second");

        // Submission order disagrees with token creation order
        stack.submit(&hb, SubmitOptions::new()).unwrap();
        stack.submit(&ha, SubmitOptions::new()).unwrap();

        let names: Vec<String> = stack.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["minted-second", "minted-first"]);

        // A dequeued identity that comes back is a fresh submission and
        // re-enters at the back of the listing
        stack.remove(&hb, false).unwrap();
        stack.submit(&hb, SubmitOptions::new()).unwrap();

        let names: Vec<String> = stack.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["minted-first", "minted-second"]);
        assert_eq!(stack.tracked_len(), 2);
    }

    #[test]
    fn test_submit_picks_up_instant_completion() {
        let (mut stack, ctl) = make_stack(2);
        ctl.set_auto_complete(true);
        let (_ta, ha) = make_transfer(&ctl, "a");

        let status = stack.submit(&ha, SubmitOptions::new()).unwrap();
        assert_eq!(status, Some(RequestStatus::Finished));

        let snapshot = stack.remove(&ha, false).unwrap().unwrap();
        assert_eq!(snapshot.status, RequestStatus::Finished);
        assert!(snapshot.body.is_some());
    }

    #[test]
    fn test_explicit_activate_and_lifo_deactivate() {
        // Limit 0 keeps the poll loop from admitting, so the explicit
        // admission toggles can be exercised in isolation.
        let (mut stack, ctl) = make_stack(0);
        let (_ta, ha) = make_transfer(&ctl, "a");
        let (_tb, hb) = make_transfer(&ctl, "b");
        let (_tc, hc) = make_transfer(&ctl, "c");
        stack.submit(&ha, SubmitOptions::new()).unwrap();
        stack.submit(&hb, SubmitOptions::new()).unwrap();
        stack.submit(&hc, SubmitOptions::new()).unwrap();
        assert_eq!(stack.pending_len(), 3);

        // Out-of-order admission of b from the middle of the queue
        let tb = stack.lookup(&hb).unwrap();
        assert!(stack.activate(Some(tb)).unwrap());
        assert_eq!(stack.status(&hb), Some(RequestStatus::Active));
        assert_eq!(stack.active_len(), 1);
        assert_eq!(stack.pending_len(), 2);

        // Already active is a no-op success
        assert!(stack.activate(Some(tb)).unwrap());

        // LIFO pop puts b back at the front of the queue
        assert!(stack.deactivate(None).unwrap());
        assert_eq!(stack.status(&hb), Some(RequestStatus::Waiting));
        assert_eq!(stack.pending_len(), 3);
        assert!(stack.activate(None).unwrap());
        assert_eq!(stack.status(&hb), Some(RequestStatus::Active));
    }

    #[test]
    fn test_admission_toggle_failure_modes() {
        let (mut stack, ctl) = make_stack(0);
        let (_ta, ha) = make_transfer(&ctl, "a");
        stack.submit(&ha, SubmitOptions::new()).unwrap();

        // Unknown token
        assert!(!stack.activate(Some(TransferToken::new())).unwrap());
        assert!(!stack.deactivate(Some(TransferToken::new())).unwrap());

        // Nothing active to pop
        assert!(!stack.deactivate(None).unwrap());

        // Tracked but already waiting deactivation is a no-op success
        let ta = stack.lookup(&ha).unwrap();
        assert!(stack.deactivate(Some(ta)).unwrap());
    }

    #[test]
    fn test_remove_untracked_is_noop() {
        let (mut stack, ctl) = make_stack(2);
        let (_ta, ha) = make_transfer(&ctl, "a");

        assert!(stack.remove(&ha, false).unwrap().is_none());
        assert_eq!(stack.tracked_len(), 0);
        assert_eq!(stack.stats().canceled, 0);
    }

    #[test]
    fn test_remove_cancels_and_is_idempotent() {
        let (mut stack, ctl) = make_stack(1);
        let (_ta, ha) = make_transfer(&ctl, "a");
        stack.submit(&ha, SubmitOptions::new()).unwrap();
        assert_eq!(stack.status(&ha), Some(RequestStatus::Active));

        let snapshot = stack.remove(&ha, false).unwrap().unwrap();
        assert_eq!(snapshot.status, RequestStatus::Canceled);
        assert!(snapshot.code.is_none());
        assert!(snapshot.error.is_none());
        assert!(snapshot.removed_at_ms.is_some());
        assert!(snapshot.elapsed_ms.is_some());

        assert!(!stack.is_tracked(&ha));
        assert!(ctl.attached_tokens().is_empty());
        assert_eq!(stack.stats().canceled, 1);

        assert!(stack.remove(&ha, false).unwrap().is_none());
    }

    #[test]
    fn test_lowered_limit_keeps_active_transfers() {
        let (mut stack, ctl) = make_stack(3);
        let (ta, ha) = make_transfer(&ctl, "a");
        let (_tb, hb) = make_transfer(&ctl, "b");
        let (_tc, hc) = make_transfer(&ctl, "c");
        stack.submit(&ha, SubmitOptions::new()).unwrap();
        stack.submit(&hb, SubmitOptions::new()).unwrap();
        stack.submit(&hc, SubmitOptions::new()).unwrap();
        assert_eq!(stack.active_len(), 3);

        stack.set_concurrency_limit(1);
        stack.refresh(true).unwrap();
        assert_eq!(stack.active_len(), 3);

        // A new submission only queues while over the lowered limit
        let (_td, hd) = make_transfer(&ctl, "d");
        stack.submit(&hd, SubmitOptions::new()).unwrap();
        assert_eq!(stack.status(&hd), Some(RequestStatus::Waiting));

        // Completing one does not refill either: still over the limit
        assert!(ctl.complete(&ta, b"done"));
        stack.refresh(true).unwrap();
        assert_eq!(stack.status(&ha), Some(RequestStatus::Finished));
        assert_eq!(stack.active_len(), 2);
        assert_eq!(stack.status(&hd), Some(RequestStatus::Waiting));
    }

    #[test]
    fn test_membership_counts_stay_consistent() {
        let (mut stack, ctl) = make_stack(2);
        let handles: Vec<_> = (0..5)
            .map(|i| make_transfer(&ctl, &format!("t{}", i)))
            .collect();
        for (_t, h) in &handles {
            stack.submit(h, SubmitOptions::new()).unwrap();
        }

        for _ in 0..3 {
            stack.refresh(true).unwrap();
            assert!(stack.active_len() <= 2);

            let snapshots = stack.snapshot();
            assert_eq!(snapshots.len(), stack.tracked_len());
            let active = snapshots
                .iter()
                .filter(|s| s.status == RequestStatus::Active)
                .count();
            let waiting = snapshots
                .iter()
                .filter(|s| s.status == RequestStatus::Waiting)
                .count();
            assert_eq!(active, stack.active_len());
            assert_eq!(waiting, stack.pending_len());
        }
    }

    #[test]
    fn test_status_and_lookup() {
        let (mut stack, ctl) = make_stack(1);
        let (_ta, ha) = make_transfer(&ctl, "a");

        assert!(stack.status(&ha).is_none());
        assert!(stack.lookup(&ha).is_none());

        stack.submit(&ha, SubmitOptions::new()).unwrap();
        assert_eq!(stack.lookup(&ha), Some(ha.token()));
        assert_eq!(stack.status(&ha), Some(RequestStatus::Active));
    }
}
