//! File-backed storage.
//!
//! All entries live in one JSON object on disk. Every mutation rewrites the
//! file through a temp file and a rename so a crash never leaves a torn file.

use crate::{PersistentStorage, StorageBatch, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// JSON file storage with an in-memory cache.
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, creating it lazily on first write.
    ///
    /// An unreadable or corrupt file is logged and treated as empty; the next
    /// write replaces it.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let data = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Storage file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        debug!(path = %path.display(), entries = data.len(), "Opened file storage");

        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to the cached map and persist the result.
    ///
    /// The cache is only updated once the file write succeeded.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> StorageResult<T> {
        let mut data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = data.clone();
        let result = mutate(&mut next);
        self.persist(&next)?;
        *data = next;
        Ok(result)
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "storage.json".to_string());
        let tmp_path = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::Io(e));
        }

        Ok(())
    }
}

impl PersistentStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let present = self.get(key)?.is_some();
        if !present {
            return Ok(false);
        }
        self.mutate(|data| data.remove(key).is_some())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        self.mutate(|data| {
            for (key, value) in entries {
                data.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.mutate(|data| {
            for key in keys {
                data.remove(*key);
            }
        })
    }

    fn apply(&self, batch: &StorageBatch<'_>) -> StorageResult<bool> {
        let mut data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !batch.guard_holds(|key| data.get(key).cloned()) {
            return Ok(false);
        }

        let mut next = data.clone();
        for (key, value) in &batch.set {
            next.insert(key.to_string(), value.to_string());
        }
        for key in &batch.delete {
            next.remove(*key);
        }
        self.persist(&next)?;
        *data = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let storage = FileStorage::open(&path).unwrap();
        storage
            .set_many(&[("accessToken", "a"), ("refreshToken", "r")])
            .unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("accessToken").unwrap(), Some("a".to_string()));
        assert_eq!(reopened.get("refreshToken").unwrap(), Some("r".to_string()));
    }

    #[test]
    fn test_delete_many_removes_only_named_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(&dir.path().join("storage.json")).unwrap();

        storage.set("keep", "1").unwrap();
        storage.set("drop", "2").unwrap();
        storage.delete_many(&["drop", "missing"]).unwrap();

        assert!(storage.has("keep").unwrap());
        assert!(!storage.has("drop").unwrap());
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.get("accessToken").unwrap(), None);

        storage.set("accessToken", "fresh").unwrap();
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("accessToken").unwrap(), Some("fresh".to_string()));
    }

    #[test]
    fn test_guarded_batch_skips_write_on_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.set_many(&[("refreshToken", "r1"), ("userId", "u")]).unwrap();

        let stale = StorageBatch::new()
            .expect("refreshToken", Some("r0"))
            .set("refreshToken", "r2");
        assert!(!storage.apply(&stale).unwrap());
        assert_eq!(storage.get("refreshToken").unwrap(), Some("r1".to_string()));

        let current = StorageBatch::new()
            .expect("refreshToken", Some("r1"))
            .set("refreshToken", "r2")
            .delete("userId");
        assert!(storage.apply(&current).unwrap());

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("refreshToken").unwrap(), Some("r2".to_string()));
        assert!(!reopened.has("userId").unwrap());
    }

    #[test]
    fn test_delete_missing_key_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let storage = FileStorage::open(&path).unwrap();

        assert!(!storage.delete("accessToken").unwrap());
        assert!(!path.exists());
    }
}
