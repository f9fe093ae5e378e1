use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use savesync_core::Clock;

use crate::error::StorageError;
use crate::traits::{RemoteStore, Store};

/// A remote namespace kept in a SQLite database, e.g. on a synced volume.
/// Every write is a single statement, so a reader never sees half a file.
pub struct SqliteRemoteStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
    available: bool,
}

impl SqliteRemoteStore {
    pub fn open(path: &str, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            clock,
            available: true,
        })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            clock,
            available: true,
        })
    }

    /// Mark the provider offline/online, e.g. while the sync volume is
    /// unmounted.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn names(&self) -> Result<Vec<String>, StorageError> {
        self.check_available()?;
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM remote_files ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    fn modified_ms(&self, name: &str) -> Result<i64, StorageError> {
        self.check_available()?;
        self.conn
            .query_row(
                "SELECT modified_ms FROM remote_files WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn upsert(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let now_ms = self.clock.utc_now().timestamp_millis();
        self.conn.execute(
            "INSERT INTO remote_files (name, content, modified_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET content = excluded.content, modified_ms = excluded.modified_ms",
            params![name, content, now_ms],
        )?;
        Ok(())
    }
}

impl Store for SqliteRemoteStore {
    fn exists(&self, path: &str) -> bool {
        self.modified_ms(path).is_ok()
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        self.check_available()?;
        self.conn
            .query_row(
                "SELECT content FROM remote_files WHERE name = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.upsert(path, content)?;
        tracing::debug!(name = path, bytes = content.len(), "remote file written");
        Ok(())
    }

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<(), StorageError> {
        let content = self.read(src)?;
        if !overwrite && self.exists(dst) {
            return Err(StorageError::AlreadyExists(dst.to_string()));
        }
        self.upsert(dst, &content)
    }

    fn delete(&mut self, path: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.conn
            .execute("DELETE FROM remote_files WHERE name = ?1", params![path])?;
        Ok(())
    }

    fn last_modified_utc(&self, path: &str) -> Result<DateTime<Utc>, StorageError> {
        let ms = self.modified_ms(path)?;
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| StorageError::NotFound(format!("{path}: timestamp out of range")))
    }
}

impl RemoteStore for SqliteRemoteStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn timestamp_unix(&self, name: &str) -> Result<i64, StorageError> {
        Ok(self.modified_ms(name)?.div_euclid(1000))
    }
}
