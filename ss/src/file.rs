//! Directory-backed store
//!
//! Each key maps to `<dir>/<key>.val`. Writes go to a sibling temp file which
//! is synced and then renamed over the target, so a crash mid-write leaves the
//! previous value intact.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use crate::{KvStore, StoreError, StoreResult, validate_key};

const VALUE_EXT: &str = "val";
const LOCK_FILE: &str = ".lock";

/// Key/value store persisted as one file per key
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Held for the lifetime of the store; the advisory lock drops with it
    _lock: File,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    ///
    /// Fails with [`StoreError::Locked`] if another process holds the directory.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!("FileStore::open: {}", dir.display());
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.display().to_string()))?;

        Ok(Self { dir, _lock: lock })
    }

    /// Root directory of this store
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, VALUE_EXT))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", key, VALUE_EXT))
    }

    fn sync_dir(&self) {
        // Directory fsync makes the rename durable; not supported everywhere
        if let Ok(dir) = File::open(&self.dir)
            && let Err(e) = dir.sync_all()
        {
            debug!("FileStore::sync_dir: {}", e);
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        let tmp = self.temp_path(key);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, self.value_path(key)) {
            warn!("FileStore::put: rename failed for {}: {}", key, e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.sync_dir();
        debug!("FileStore::put: {} ({} bytes)", key, value.len());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {
                self.sync_dir();
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_delete() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        assert!(store.get("active_session").unwrap().is_none());

        store.put("active_session", b"{\"id\":\"a\"}").unwrap();
        assert_eq!(store.get("active_session").unwrap().unwrap(), b"{\"id\":\"a\"}");

        store.put("active_session", b"{}").unwrap();
        assert_eq!(store.get("active_session").unwrap().unwrap(), b"{}");

        store.delete("active_session").unwrap();
        assert!(store.get("active_session").unwrap().is_none());

        // Deleting again is fine
        store.delete("active_session").unwrap();
    }

    #[test]
    fn test_leftover_temp_file_is_ignored() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        store.put("session_history", b"[]").unwrap();
        // A write interrupted before its rename
        fs::write(temp.path().join(".session_history.val.tmp"), b"[{\"id\"").unwrap();
        fs::write(temp.path().join(".active_session.val.tmp"), b"partial").unwrap();

        assert_eq!(store.get("session_history").unwrap().unwrap(), b"[]");
        assert!(store.get("active_session").unwrap().is_none());
    }

    #[test]
    fn test_reopen_sees_previous_values() {
        let temp = tempdir().unwrap();
        {
            let store = FileStore::open(temp.path()).unwrap();
            store.put("scheduler_degraded", b"true").unwrap();
        }
        let store = FileStore::open(temp.path()).unwrap();
        assert_eq!(store.get("scheduler_degraded").unwrap().unwrap(), b"true");
    }

    #[test]
    fn test_second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = FileStore::open(temp.path()).unwrap();
        let second = FileStore::open(temp.path());
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn test_rejects_invalid_key() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        assert!(matches!(store.put("../escape", b"x"), Err(StoreError::InvalidKey(_))));
    }
}
