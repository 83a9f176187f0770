//! In-memory storage backend.

use crate::{PersistentStorage, StorageBatch, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local storage. Used for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistentStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data().remove(key).is_some())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        let mut data = self.data();
        for (key, value) in entries {
            data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        let mut data = self.data();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }

    fn apply(&self, batch: &StorageBatch<'_>) -> StorageResult<bool> {
        let mut data = self.data();
        if !batch.guard_holds(|key| data.get(key).cloned()) {
            return Ok(false);
        }
        for (key, value) in &batch.set {
            data.insert(key.to_string(), value.to_string());
        }
        for key in &batch.delete {
            data.remove(*key);
        }
        Ok(true)
    }
}
