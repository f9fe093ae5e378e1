use savesync_core::{CoreError, IntegrityError};
use savesync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid config: {0}")]
    Config(String),
}

/// Failures of a synchronization pass. Always recovered inside the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("remote storage unavailable")]
    RemoteUnavailable,
}
