//! Transfer Handles
//!
//! The scheduler never touches the underlying transfer resource directly; it
//! sees handles only through the [`Transfer`] trait and keys every piece of
//! bookkeeping on the handle's [`TransferToken`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide token counter, so tokens stay unique across stacks
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque transfer identity, minted once per handle
///
/// Using a monotonic counter provides:
/// - Sortable tokens: token order is creation order
/// - No coordination needed (no machine_id)
/// - No reuse, so a recycled engine-side resource can never alias a
///   previously tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferToken(u64);

impl TransferToken {
    /// Mint the next unique token
    pub fn new() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner numeric value
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl Default for TransferToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound transfer as the scheduler sees it
///
/// Implementations wrap whatever per-transfer resource the engine drives.
/// Handles are shared between the caller and the scheduler, so all methods
/// take `&self`; stateful accessors like [`Transfer::take_body`] are expected
/// to use interior mutability.
pub trait Transfer: Send + Sync {
    /// Identity token minted when the handle was created
    fn token(&self) -> TransferToken;

    /// Short name for logging
    fn name(&self) -> &str;

    /// Whether the underlying transfer resource is usable.
    /// Submission is refused for handles that report false.
    fn is_open(&self) -> bool;

    /// Drain the buffered response body, if the transfer produced one
    fn take_body(&self) -> Option<Vec<u8>>;

    /// Diagnostic info the engine has gathered for this transfer so far
    fn diagnostics(&self) -> Option<serde_json::Value>;

    /// Last per-transfer error text reported by the engine
    fn error_text(&self) -> Option<String>;
}

/// Shared transfer handle, cloneable between the caller and the scheduler
pub type TransferHandle = Arc<dyn Transfer>;
