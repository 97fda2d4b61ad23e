//! Transfer Stack Scheduler
//!
//! Bounded-concurrency multiplexer for outbound transfers. Callers submit
//! handles, the stack caps how many are attached to the engine at once,
//! drives the engine to make progress, expires overdue requests and reports
//! completion through callbacks or blocking waits.
//!
//! # Architecture
//!
//! ```text
//!             ┌─────────────┐   activate   ┌─────────────┐  done, code 0
//! submit ───▶ │   pending   │ ───────────▶ │   active    │ ───────────────▶ FINISHED
//!             │   (FIFO)    │ ◀─────────── │  (≤ limit)  │ ───────────────▶ ERROR
//!             └──────┬──────┘  deactivate  └──────┬──────┘  done, code ≠ 0
//!                    │                            │
//!                    │     remove / budget elapsed│
//!                    └──────────────┬─────────────┘
//!                                   ▼
//!                         CANCELED / EXPIRED
//! ```
//!
//! # Scheduling Invariants
//!
//! 1. One record per token; re-submission merges options, never resets state
//! 2. A live record sits in exactly one of {pending, active}; terminal
//!    records sit in neither
//! 3. `|active| <= concurrency_limit` except transiently inside one
//!    admission step
//! 4. Terminal statuses absorb; records stay inspectable until dequeued
//! 5. Every record is finalized exactly once and its callback fires at most
//!    once, ever

pub mod error;
pub mod record;
pub mod scheduler;
pub mod stats;
pub mod status;


// Re-exports for convenience
pub use error::StackError;
pub use record::{RecordSnapshot, SubmitOptions, TransferCallback};
pub use scheduler::TransferStack;
pub use stats::StackStats;
pub use status::RequestStatus;
