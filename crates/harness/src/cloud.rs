use std::path::PathBuf;
use std::sync::Arc;

use savesync_core::ManualClock;
use savesync_engine::{EngineError, SaveConfig};
use savesync_storage::{SqliteRemoteStore, StorageError};
use tempfile::TempDir;

use crate::TestRig;

/// One remote namespace shared by several simulated devices. Each device
/// gets its own connection to the same SQLite file.
pub struct SharedCloud {
    _dir: TempDir,
    path: PathBuf,
}

impl SharedCloud {
    pub fn new() -> Result<Self, StorageError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cloud.db");
        Ok(Self { _dir: dir, path })
    }

    pub fn open(&self, clock: Arc<ManualClock>) -> Result<SqliteRemoteStore, StorageError> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| StorageError::InvalidPath(self.path.display().to_string()))?;
        SqliteRemoteStore::open(path, clock)
    }

    /// A fresh device (empty local store) attached to this cloud.
    pub fn device(&self, clock: Arc<ManualClock>) -> Result<TestRig<SqliteRemoteStore>, EngineError> {
        let remote = self.open(clock.clone())?;
        TestRig::with_remote(SaveConfig::default(), clock, remote)
    }
}
