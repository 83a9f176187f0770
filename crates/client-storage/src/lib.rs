//! Persistent storage for the Townsquare client.
//!
//! This crate provides:
//! - A key-value storage trait with file-backed and in-memory backends
//! - The credential store that owns the access/refresh token pair
//! - A mirror that keeps the authorization cookie in step with the store

mod cookie;
mod credentials;
mod file;
mod keys;
mod memory;
mod traits;

pub use cookie::{AuthCookie, CookieMirror, JarCookieMirror, MemoryCookieMirror, NoCookieMirror};
pub use credentials::{
    normalize_credentials, CredentialPair, CredentialStore, NormalizedCredentials,
    RefreshedCredentials,
};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::{PersistentStorage, StorageBatch};

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default file-backed storage at `path`.
pub fn create_storage(path: &Path) -> StorageResult<Box<dyn PersistentStorage>> {
    let storage = FileStorage::open(path)?;
    Ok(Box::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.set("test_key", "test_value").unwrap();
        assert_eq!(storage.get("test_key").unwrap(), Some("test_value".to_string()));

        assert!(storage.has("test_key").unwrap());
        assert!(!storage.has("nonexistent").unwrap());

        assert!(storage.delete("test_key").unwrap());
        assert!(!storage.delete("test_key").unwrap());
        assert_eq!(storage.get("test_key").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_guarded_batch() {
        let storage = MemoryStorage::new();
        let batch = StorageBatch::new()
            .expect(StorageKeys::REFRESH_TOKEN, None)
            .set(StorageKeys::REFRESH_TOKEN, "r");

        assert!(storage.apply(&batch).unwrap());
        assert!(!storage.apply(&batch).unwrap());
        assert_eq!(storage.get(StorageKeys::REFRESH_TOKEN).unwrap(), Some("r".to_string()));
    }

    #[test]
    fn test_create_storage_uses_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let storage = create_storage(&path).unwrap();
        storage.set(StorageKeys::USER_ID, "42").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_storage_keys_unique() {
        let keys = StorageKeys::CREDENTIAL_KEYS;
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "Storage keys must be unique");
        assert!(!keys.contains(&StorageKeys::AUTH_COOKIE));
    }
}
