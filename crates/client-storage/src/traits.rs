//! Storage trait definitions.

use crate::StorageResult;

/// Writes and deletes applied together, optionally guarded by the current
/// value of one key.
#[derive(Debug, Default, Clone)]
pub struct StorageBatch<'a> {
    pub(crate) expect: Option<(&'a str, Option<&'a str>)>,
    pub(crate) set: Vec<(&'a str, &'a str)>,
    pub(crate) delete: Vec<&'a str>,
}

impl<'a> StorageBatch<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only apply the batch if `key` currently holds `value` (`None`: absent).
    pub fn expect(mut self, key: &'a str, value: Option<&'a str>) -> Self {
        self.expect = Some((key, value));
        self
    }

    pub fn set(mut self, key: &'a str, value: &'a str) -> Self {
        self.set.push((key, value));
        self
    }

    pub fn delete(mut self, key: &'a str) -> Self {
        self.delete.push(key);
        self
    }

    /// Whether the guard holds for a lookup function over the current data.
    pub(crate) fn guard_holds(&self, current: impl FnOnce(&str) -> Option<String>) -> bool {
        match self.expect {
            Some((key, expected)) => current(key).as_deref() == expected,
            None => true,
        }
    }
}

/// Trait for persistent key-value storage backends.
pub trait PersistentStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Store several values as one operation.
    ///
    /// Backends that can persist a batch in a single write should override this
    /// so readers never observe a partially applied batch.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Delete several values as one operation.
    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    /// Apply a batch, returning `false` without writing when its guard fails.
    ///
    /// The default is not atomic; both bundled backends override it.
    fn apply(&self, batch: &StorageBatch<'_>) -> StorageResult<bool> {
        if let Some((key, _)) = batch.expect {
            let current = self.get(key)?;
            if !batch.guard_holds(|_| current) {
                return Ok(false);
            }
        }
        self.set_many(&batch.set)?;
        self.delete_many(&batch.delete)?;
        Ok(true)
    }
}
