use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("remote storage unavailable")]
    Unavailable,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("injected failure: {0}")]
    Injected(String),
}
