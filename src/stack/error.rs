use thiserror::Error;

use crate::engine::EngineError;
use crate::handle::TransferToken;

/// Fatal scheduler errors
///
/// These mean the shared multiplexing state can no longer be trusted. They
/// are distinct from per-transfer failures, which are carried inside the
/// record as a terminal status plus error text.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("unexpected engine event for transfer {token} (kind {kind})")]
    Protocol { token: TransferToken, kind: i32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// The engine's numeric code, where one exists
    pub fn code(&self) -> Option<i32> {
        match self {
            StackError::Engine(e) => Some(e.code),
            _ => None,
        }
    }
}
