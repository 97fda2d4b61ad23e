//! Simulated transfer engine
//!
//! In-memory stand-in for a real multi-transfer engine, used by the test
//! suite and available to embedders behind the `sim` feature. Completions
//! are scripted through a [`SimController`] that can be cloned across
//! threads, with failure injection knobs and call counters for asserting on
//! engine interactions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::{EngineError, EngineEvent, MultiEngine, StepReport};
use crate::handle::{Transfer, TransferHandle, TransferToken};

// ============================================================
// SIMULATED TRANSFER
// ============================================================

#[derive(Default)]
struct SimTransferState {
    open: bool,
    body: Option<Vec<u8>>,
    diagnostics: Option<serde_json::Value>,
    error_text: Option<String>,
}

/// A scriptable transfer resource
pub struct SimTransfer {
    token: TransferToken,
    name: String,
    inner: Mutex<SimTransferState>,
}

impl SimTransfer {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            token: TransferToken::new(),
            name: name.to_string(),
            inner: Mutex::new(SimTransferState {
                open: true,
                ..SimTransferState::default()
            }),
        })
    }

    /// Release the underlying resource; submissions are refused afterwards
    pub fn close_resource(&self) {
        self.inner.lock().unwrap().open = false;
    }

    fn deposit(
        &self,
        body: Option<Vec<u8>>,
        diagnostics: Option<serde_json::Value>,
        error_text: Option<String>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if body.is_some() {
            inner.body = body;
        }
        if diagnostics.is_some() {
            inner.diagnostics = diagnostics;
        }
        if error_text.is_some() {
            inner.error_text = error_text;
        }
    }
}

impl Transfer for SimTransfer {
    fn token(&self) -> TransferToken {
        self.token
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    fn take_body(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().body.take()
    }

    fn diagnostics(&self) -> Option<serde_json::Value> {
        self.inner.lock().unwrap().diagnostics.clone()
    }

    fn error_text(&self) -> Option<String> {
        self.inner.lock().unwrap().error_text.clone()
    }
}

// ============================================================
// SIMULATED ENGINE
// ============================================================

#[derive(Default)]
struct SimState {
    open: bool,
    /// Attachment order is preserved so auto-completion is deterministic
    attached: Vec<(TransferToken, TransferHandle)>,
    settled: FxHashSet<TransferToken>,
    events: VecDeque<EngineEvent>,
    minted: FxHashMap<TransferToken, Arc<SimTransfer>>,
    auto_complete: bool,
    busy_steps: u32,
    fail_next_step: Option<EngineError>,
    fail_next_attach: Option<EngineError>,
    opens: u64,
    closes: u64,
    attaches: u64,
    detaches: u64,
    steps: u64,
    waits: u64,
}

/// Simulated multi-transfer engine.
///
/// Lock order is engine state first, then any individual transfer, on every
/// path that touches both.
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Scripting handle sharing this engine's state
    pub fn controller(&self) -> SimController {
        SimController {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiEngine for SimEngine {
    fn open(&mut self) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        if !s.open {
            s.open = true;
            s.opens += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut s = self.state.lock().unwrap();
        if s.open {
            s.open = false;
            s.closes += 1;
            s.attached.clear();
            s.settled.clear();
            s.events.clear();
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn attach(&mut self, handle: &TransferHandle) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        if let Some(err) = s.fail_next_attach.take() {
            return Err(err);
        }
        if !s.open {
            return Err(EngineError::new(2, "attach on closed engine"));
        }
        let token = handle.token();
        if s.attached.iter().any(|(t, _)| *t == token) {
            return Ok(());
        }
        s.attached.push((token, handle.clone()));
        s.attaches += 1;
        Ok(())
    }

    fn detach(&mut self, token: TransferToken) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        s.attached.retain(|(t, _)| *t != token);
        s.settled.remove(&token);
        s.events.retain(|e| e.token() != token);
        s.detaches += 1;
        Ok(())
    }

    fn step(&mut self) -> Result<StepReport, EngineError> {
        let mut s = self.state.lock().unwrap();
        if !s.open {
            return Err(EngineError::new(3, "step on closed engine"));
        }
        s.steps += 1;
        if let Some(err) = s.fail_next_step.take() {
            return Err(err);
        }

        if s.auto_complete {
            let todo: Vec<TransferToken> = s
                .attached
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| !s.settled.contains(t))
                .collect();
            for token in todo {
                if let Some(transfer) = s.minted.get(&token).cloned() {
                    transfer.deposit(
                        Some(format!("{} body", transfer.name()).into_bytes()),
                        None,
                        None,
                    );
                }
                s.settled.insert(token);
                s.events.push_back(EngineEvent::Done { token, code: 0 });
            }
        }

        let more_work = if s.busy_steps > 0 {
            s.busy_steps -= 1;
            true
        } else {
            false
        };
        let settled_active = s
            .attached
            .iter()
            .filter(|(t, _)| s.settled.contains(t))
            .count();
        Ok(StepReport {
            running: s.attached.len() - settled_active,
            more_work,
        })
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        let mut s = self.state.lock().unwrap();
        s.waits += 1;
        if !s.events.is_empty() {
            return Ok(true);
        }
        drop(s);
        // No readiness source to select on; completions land in the event
        // queue from controller threads and get drained next pass
        std::thread::sleep(timeout);
        Ok(false)
    }

    fn next_event(&mut self) -> Option<EngineEvent> {
        self.state.lock().unwrap().events.pop_front()
    }
}

// ============================================================
// CONTROLLER
// ============================================================

/// Scripting and inspection handle for a [`SimEngine`].
///
/// Clones share state with the engine, so a test can drive completions from
/// another thread while the stack under test polls.
#[derive(Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl SimController {
    /// Mint a fresh open transfer known to this engine
    pub fn transfer(&self, name: &str) -> Arc<SimTransfer> {
        let transfer = SimTransfer::new(name);
        let mut s = self.state.lock().unwrap();
        s.minted.insert(transfer.token(), transfer.clone());
        transfer
    }

    /// Complete an attached transfer successfully with the given body.
    /// Returns false when the transfer is not attached or already settled.
    pub fn complete(&self, transfer: &Arc<SimTransfer>, body: &[u8]) -> bool {
        let mut s = self.state.lock().unwrap();
        let token = transfer.token();
        if !s.attached.iter().any(|(t, _)| *t == token) || s.settled.contains(&token) {
            return false;
        }
        transfer.deposit(
            Some(body.to_vec()),
            Some(serde_json::json!({ "name": transfer.name(), "sim": true })),
            None,
        );
        s.settled.insert(token);
        s.events.push_back(EngineEvent::Done { token, code: 0 });
        true
    }

    /// Fail an attached transfer with an engine result code and error text
    pub fn fail(&self, transfer: &Arc<SimTransfer>, code: i32, error_text: &str) -> bool {
        let mut s = self.state.lock().unwrap();
        let token = transfer.token();
        if !s.attached.iter().any(|(t, _)| *t == token) || s.settled.contains(&token) {
            return false;
        }
        transfer.deposit(None, None, Some(error_text.to_string()));
        s.settled.insert(token);
        s.events.push_back(EngineEvent::Done { token, code });
        true
    }

    /// Queue an event of an unrecognized kind. The transfer keeps running.
    pub fn emit_stray(&self, transfer: &Arc<SimTransfer>, kind: i32) {
        let mut s = self.state.lock().unwrap();
        s.events.push_back(EngineEvent::Stray {
            token: transfer.token(),
            kind,
        });
    }

    /// Every step settles all attached transfers when enabled
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().unwrap().auto_complete = enabled;
    }

    /// Report `more_work` from the next N steps
    pub fn set_busy_steps(&self, steps: u32) {
        self.state.lock().unwrap().busy_steps = steps;
    }

    pub fn fail_next_step(&self, err: EngineError) {
        self.state.lock().unwrap().fail_next_step = Some(err);
    }

    pub fn fail_next_attach(&self, err: EngineError) {
        self.state.lock().unwrap().fail_next_attach = Some(err);
    }

    pub fn opens(&self) -> u64 {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> u64 {
        self.state.lock().unwrap().closes
    }

    pub fn attaches(&self) -> u64 {
        self.state.lock().unwrap().attaches
    }

    pub fn detaches(&self) -> u64 {
        self.state.lock().unwrap().detaches
    }

    pub fn steps(&self) -> u64 {
        self.state.lock().unwrap().steps
    }

    pub fn waits(&self) -> u64 {
        self.state.lock().unwrap().waits
    }

    pub fn queued_events(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn attached_tokens(&self) -> Vec<TransferToken> {
        self.state
            .lock()
            .unwrap()
            .attached
            .iter()
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn is_attached(&self, transfer: &Arc<SimTransfer>) -> bool {
        self.attached_tokens().contains(&transfer.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn open_engine() -> (SimEngine, SimController) {
        let mut engine = SimEngine::new();
        let ctl = engine.controller();
        engine.open().unwrap();
        (engine, ctl)
    }

    #[test]
    fn test_transfer_resource_lifecycle() {
        let (mut engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        assert!(t.is_open());
        assert!(t.take_body().is_none());

        let handle: TransferHandle = t.clone();
        engine.attach(&handle).unwrap();
        assert!(ctl.complete(&t, b"payload"));

        assert_eq!(t.take_body().as_deref(), Some(b"payload".as_slice()));
        assert!(t.take_body().is_none());
        assert!(t.diagnostics().is_some());

        t.close_resource();
        assert!(!t.is_open());
    }

    #[test]
    fn test_complete_requires_attachment() {
        let (_engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        assert!(!ctl.complete(&t, b"early"));
        assert_eq!(ctl.queued_events(), 0);
    }

    #[test]
    fn test_complete_is_one_shot() {
        let (mut engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        let handle: TransferHandle = t.clone();
        engine.attach(&handle).unwrap();

        assert!(ctl.complete(&t, b"first"));
        assert!(!ctl.complete(&t, b"second"));
        assert_eq!(ctl.queued_events(), 1);
    }

    #[test]
    fn test_detach_purges_token_state() {
        let (mut engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        let handle: TransferHandle = t.clone();
        engine.attach(&handle).unwrap();
        ctl.complete(&t, b"body");
        assert_eq!(ctl.queued_events(), 1);

        engine.detach(t.token()).unwrap();
        assert!(ctl.attached_tokens().is_empty());
        assert_eq!(ctl.queued_events(), 0);
    }

    #[test]
    fn test_step_reports_running_and_busy() {
        let (mut engine, ctl) = open_engine();
        let a = ctl.transfer("a");
        let b = ctl.transfer("b");
        let ha: TransferHandle = a.clone();
        let hb: TransferHandle = b.clone();
        engine.attach(&ha).unwrap();
        engine.attach(&hb).unwrap();

        let report = engine.step().unwrap();
        assert_eq!(report.running, 2);
        assert!(!report.more_work);

        ctl.complete(&a, b"done");
        assert_eq!(engine.step().unwrap().running, 1);

        ctl.set_busy_steps(1);
        assert!(engine.step().unwrap().more_work);
        assert!(!engine.step().unwrap().more_work);
    }

    #[test]
    fn test_wait_ready_short_circuits_on_events() {
        let (mut engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        let handle: TransferHandle = t.clone();
        engine.attach(&handle).unwrap();
        ctl.complete(&t, b"body");

        let start = Instant::now();
        assert!(engine.wait_ready(Duration::from_secs(1)).unwrap());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_close_clears_engine_state() {
        let (mut engine, ctl) = open_engine();
        let t = ctl.transfer("r1");
        let handle: TransferHandle = t.clone();
        engine.attach(&handle).unwrap();
        ctl.complete(&t, b"body");

        engine.close();
        assert!(!engine.is_open());
        assert!(ctl.attached_tokens().is_empty());
        assert_eq!(ctl.queued_events(), 0);
        assert_eq!(ctl.closes(), 1);
    }

    #[test]
    fn test_failure_injection_is_single_shot() {
        let (mut engine, ctl) = open_engine();
        ctl.fail_next_step(EngineError::new(9, "injected"));
        assert!(engine.step().is_err());
        assert!(engine.step().is_ok());
    }
}
