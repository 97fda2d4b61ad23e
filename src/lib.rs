//! reqmux - Bounded-Concurrency Transfer Multiplexer
//!
//! A scheduling layer over a synchronous multi-transfer engine: queue any
//! number of transfers, run at most N at a time, and settle each one exactly
//! once.
//!
//! # Modules
//!
//! - [`handle`] - Transfer identity and the resource-facing trait
//! - [`engine`] - Multi-transfer engine abstraction
//! - [`stack`] - The scheduler: admission, polling, finalization, waiting
//! - [`config`] - Runtime configuration loaded from YAML
//! - [`logging`] - Structured logging setup
//! - [`sim`] - Simulated engine for tests and embedder experiments

// Identity and engine seams - must be first!
pub mod engine;
pub mod handle;

// The scheduler
pub mod stack;

// Runtime plumbing
pub mod config;
pub mod logging;

// Scriptable engine, for tests and the `sim` feature
#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Convenient re-exports at crate root
pub use config::{LogConfig, StackConfig};
pub use engine::{EngineError, EngineEvent, MultiEngine, StepReport};
pub use handle::{Transfer, TransferHandle, TransferToken};
pub use logging::init_logging;
pub use stack::{
    RecordSnapshot, RequestStatus, StackError, StackStats, SubmitOptions, TransferCallback,
    TransferStack,
};

// Simulated engine re-exports
#[cfg(any(test, feature = "sim"))]
pub use sim::{SimController, SimEngine, SimTransfer};
