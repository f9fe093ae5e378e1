use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::traits::Store;

const TEMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bak";

/// Local store rooted at a directory. Keys are relative paths below the root.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `key`. Rejects keys that would escape the root.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !clean {
            return Err(StorageError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

impl Store for FsStore {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> Result<String, StorageError> {
        let full = self.resolve(path)?;
        match fs::read_to_string(&full) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `<path>.tmp`, park the old file at `<path>.bak`, move the temp
    /// file into place, then drop the `.bak`.
    fn write(&mut self, path: &str, content: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;

        let tmp = with_suffix(&full, TEMP_SUFFIX);
        let bak = with_suffix(&full, BACKUP_SUFFIX);
        fs::write(&tmp, content)?;

        if full.exists() {
            fs::copy(&full, &bak)?;
        }
        if let Err(e) = fs::rename(&tmp, &full) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if bak.exists() {
            fs::remove_file(&bak)?;
        }
        Ok(())
    }

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<(), StorageError> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if !from.is_file() {
            return Err(StorageError::NotFound(src.to_string()));
        }
        if !overwrite && to.exists() {
            return Err(StorageError::AlreadyExists(dst.to_string()));
        }
        Self::ensure_parent(&to)?;
        fs::copy(&from, &to)?;
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn last_modified_utc(&self, path: &str) -> Result<DateTime<Utc>, StorageError> {
        let full = self.resolve(path)?;
        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(DateTime::<Utc>::from(meta.modified()?))
    }
}
