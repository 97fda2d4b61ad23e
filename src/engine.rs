//! Multi-Transfer Engine Contract
//!
//! The trait the scheduler drives. A multi-transfer engine owns one
//! multiplexing context that can execute many attached transfers without a
//! thread per transfer; the scheduler opens the context lazily, steps it,
//! drains its completion events and closes it again when idle.

use std::time::Duration;

use thiserror::Error;

use crate::handle::{TransferHandle, TransferToken};

/// Fatal engine failure carrying the engine's numeric code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine call failed (code {code}): {message}")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome of one non-blocking drive step
#[derive(Debug, Clone, Copy, Default)]
pub struct StepReport {
    /// Transfers the engine still considers in flight
    pub running: usize,
    /// True when another immediate step would make more progress
    pub more_work: bool,
}

/// One queued completion message read back from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The transfer reached its terminal engine state.
    /// `code` 0 means success; anything else is the per-transfer failure code.
    Done { token: TransferToken, code: i32 },

    /// Any other message kind an engine may queue. The scheduler treats
    /// these as protocol violations.
    Stray { token: TransferToken, kind: i32 },
}

impl EngineEvent {
    /// Token the event refers to
    pub fn token(&self) -> TransferToken {
        match self {
            EngineEvent::Done { token, .. } | EngineEvent::Stray { token, .. } => *token,
        }
    }
}

/// Synchronous multi-transfer engine
///
/// The context is opened lazily on first admission and released whenever the
/// scheduler drains, so `open` may be called many times over the life of one
/// engine value. Implementations must not assume any call ordering beyond:
/// attach/detach/step/wait_ready only happen while the context is open.
pub trait MultiEngine: Send {
    /// Create the multiplexing context
    fn open(&mut self) -> Result<(), EngineError>;

    /// Tear the context down, dropping attachments and queued events.
    /// Idempotent.
    fn close(&mut self);

    /// Whether a context currently exists
    fn is_open(&self) -> bool;

    /// Attach a handle to the context
    fn attach(&mut self, handle: &TransferHandle) -> Result<(), EngineError>;

    /// Detach a handle and drop its queued events. Unattached tokens are a
    /// no-op.
    fn detach(&mut self, token: TransferToken) -> Result<(), EngineError>;

    /// Drive one non-blocking execution step
    fn step(&mut self) -> Result<StepReport, EngineError>;

    /// Block until any attached transfer has activity, or the timeout
    /// passes. Returns whether there was activity.
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, EngineError>;

    /// Read one queued completion event, oldest first
    fn next_event(&mut self) -> Option<EngineEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::new(6, "could not resolve host");
        assert_eq!(
            err.to_string(),
            "engine call failed (code 6): could not resolve host"
        );
    }

    #[test]
    fn test_event_token() {
        let token = TransferToken::new();
        assert_eq!(EngineEvent::Done { token, code: 0 }.token(), token);
        assert_eq!(EngineEvent::Stray { token, kind: 3 }.token(), token);
    }
}
