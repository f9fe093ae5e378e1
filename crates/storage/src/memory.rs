use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use savesync_core::Clock;

use crate::error::StorageError;
use crate::traits::{RemoteStore, Store};

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    modified: DateTime<Utc>,
}

/// In-memory store usable as either replica. Writes are stamped with the
/// injected clock. Availability and I/O failures can be switched on for
/// tests.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    files: BTreeMap<String, Entry>,
    available: bool,
    fail_reads: bool,
    fail_writes: bool,
    writes: u64,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            files: BTreeMap::new(),
            available: true,
            fail_reads: false,
            fail_writes: false,
            writes: 0,
        }
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Overwrite the modification time of an existing entry.
    pub fn set_modified(&mut self, path: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let entry = self
            .files
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        entry.modified = at;
        Ok(())
    }

    /// Write `content` stamped at `at` instead of the clock's time.
    pub fn put_at(&mut self, path: &str, content: &str, at: DateTime<Utc>) {
        self.files.insert(
            path.to_string(),
            Entry {
                content: content.to_string(),
                modified: at,
            },
        );
    }

    /// All keys, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of successful writes (including copies) since creation.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    fn check_writable(&self, path: &str) -> Result<(), StorageError> {
        self.check_available()?;
        if self.fail_writes {
            return Err(StorageError::Injected(format!("write to {path}")));
        }
        Ok(())
    }

    fn entry(&self, path: &str) -> Result<&Entry, StorageError> {
        self.check_available()?;
        self.files
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

impl Store for MemoryStore {
    fn exists(&self, path: &str) -> bool {
        self.available && self.files.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        let entry = self.entry(path)?;
        if self.fail_reads {
            return Err(StorageError::Injected(format!("read of {path}")));
        }
        Ok(entry.content.clone())
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), StorageError> {
        self.check_writable(path)?;
        let now = self.clock.utc_now();
        self.put_at(path, content, now);
        self.writes += 1;
        Ok(())
    }

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<(), StorageError> {
        self.check_writable(dst)?;
        let content = self.entry(src)?.content.clone();
        if !overwrite && self.files.contains_key(dst) {
            return Err(StorageError::AlreadyExists(dst.to_string()));
        }
        let now = self.clock.utc_now();
        self.put_at(dst, &content, now);
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), StorageError> {
        self.check_writable(path)?;
        self.files.remove(path);
        Ok(())
    }

    fn last_modified_utc(&self, path: &str) -> Result<DateTime<Utc>, StorageError> {
        Ok(self.entry(path)?.modified)
    }
}

impl RemoteStore for MemoryStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn timestamp_unix(&self, name: &str) -> Result<i64, StorageError> {
        Ok(self.entry(name)?.modified.timestamp())
    }
}
