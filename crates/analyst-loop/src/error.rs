use thiserror::Error;

use analyst_core::{ConfigError, MemoryError};

/// Manager-level faults. Failed provider calls are not errors here; they come
/// back inside the answer as `OperationResult::Failure`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Background request failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
