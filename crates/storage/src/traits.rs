use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Key-addressed text storage. Used for the local replica and, through
/// [`RemoteStore`], for the remote one.
pub trait Store {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<String, StorageError>;

    /// Replace the content at `path`. Implementations must not leave a
    /// partially written file behind.
    fn write(&mut self, path: &str, content: &str) -> Result<(), StorageError>;

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<(), StorageError>;

    fn delete(&mut self, path: &str) -> Result<(), StorageError>;

    fn last_modified_utc(&self, path: &str) -> Result<DateTime<Utc>, StorageError>;
}

/// A remote namespace. May be briefly unavailable and offers no
/// transactions.
pub trait RemoteStore: Store {
    fn is_available(&self) -> bool;

    /// Provider-side modification time in Unix seconds. Fallback recency
    /// signal when no usable manifest exists.
    fn timestamp_unix(&self, name: &str) -> Result<i64, StorageError>;
}
