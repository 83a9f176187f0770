//! Credential store: the access/refresh token pair and its user id.
//!
//! The upstream API names the same fields differently across its sign-in
//! endpoints. Normalization checks a fixed priority list per field; it works
//! around that inconsistency and is not meant to grow further.

use crate::{
    AuthCookie, CookieMirror, NoCookieMirror, PersistentStorage, StorageBatch, StorageKeys,
    StorageResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ACCESS_TOKEN_FIELDS: &[&str] = &["accessToken", "access_token", "token"];
const REFRESH_TOKEN_FIELDS: &[&str] = &["refreshToken", "refresh_token"];
const USER_ID_FIELDS: &[&str] = &["userId", "id", "user_id", "userid"];

const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 3600;

/// Access/refresh credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Fields recovered from a raw sign-in, exchange, or refresh response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field(raw: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| raw.get(*field).and_then(scalar_string))
}

/// Pull the credential fields out of a raw API response.
///
/// Each field is taken from the first matching name in its priority list. The
/// user id falls back to the same names inside a nested `user` object.
pub fn normalize_credentials(raw: &Value) -> NormalizedCredentials {
    let user_id = first_field(raw, USER_ID_FIELDS)
        .or_else(|| raw.get("user").and_then(|u| first_field(u, USER_ID_FIELDS)));

    NormalizedCredentials {
        access_token: first_field(raw, ACCESS_TOKEN_FIELDS),
        refresh_token: first_field(raw, REFRESH_TOKEN_FIELDS),
        user_id,
    }
}

/// Result of storing a refresh response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshedCredentials {
    Stored(CredentialPair),
    /// The response lacked a token; nothing was written.
    Incomplete,
    /// The stored refresh token changed while the refresh was in flight.
    Superseded,
}

/// Persistent home of the credential pair.
pub struct CredentialStore {
    storage: Box<dyn PersistentStorage>,
    cookies: Arc<dyn CookieMirror>,
    cookie_max_age_secs: u64,
}

impl CredentialStore {
    /// Create a store that mirrors the access token into `cookies`.
    pub fn new(
        storage: Box<dyn PersistentStorage>,
        cookies: Arc<dyn CookieMirror>,
        cookie_max_age_secs: u64,
    ) -> Self {
        Self {
            storage,
            cookies,
            cookie_max_age_secs,
        }
    }

    /// Create a store without a cookie mirror.
    pub fn with_storage(storage: Box<dyn PersistentStorage>) -> Self {
        Self::new(storage, Arc::new(NoCookieMirror), DEFAULT_COOKIE_MAX_AGE_SECS)
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.storage.get(key)?.filter(|v| !v.is_empty()))
    }

    /// Stored access token, if non-empty.
    pub fn access_token(&self) -> StorageResult<Option<String>> {
        self.read(StorageKeys::ACCESS_TOKEN)
    }

    /// Stored refresh token, if non-empty.
    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        self.read(StorageKeys::REFRESH_TOKEN)
    }

    /// Stored user id, if any.
    pub fn user_id(&self) -> StorageResult<Option<String>> {
        self.read(StorageKeys::USER_ID)
    }

    /// Whether a non-empty access token is stored right now.
    ///
    /// Storage errors are logged and read as "no session".
    pub fn has_session(&self) -> bool {
        match self.access_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                false
            }
        }
    }

    /// The stored pair, or `None` when either token is missing.
    pub fn get(&self) -> StorageResult<Option<CredentialPair>> {
        let access_token = self.access_token()?;
        let refresh_token = self.refresh_token()?;

        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(CredentialPair {
                access_token,
                refresh_token,
                user_id: self.user_id()?,
            })),
            (None, None) => Ok(None),
            (access, refresh) => {
                warn!(
                    has_access_token = access.is_some(),
                    has_refresh_token = refresh.is_some(),
                    "Stored credentials are incomplete"
                );
                Ok(None)
            }
        }
    }

    fn pair_batch<'a>(pair: &'a CredentialPair) -> StorageBatch<'a> {
        let batch = StorageBatch::new()
            .set(StorageKeys::ACCESS_TOKEN, &pair.access_token)
            .set(StorageKeys::REFRESH_TOKEN, &pair.refresh_token);
        match pair.user_id.as_deref() {
            Some(user_id) => batch.set(StorageKeys::USER_ID, user_id),
            None => batch.delete(StorageKeys::USER_ID),
        }
    }

    fn write(&self, batch: &StorageBatch<'_>, pair: &CredentialPair) -> StorageResult<bool> {
        if !self.storage.apply(batch)? {
            return Ok(false);
        }
        self.cookies
            .set(&AuthCookie::bearer(&pair.access_token, self.cookie_max_age_secs));
        debug!(user_id = ?pair.user_id, "Stored credential pair");
        Ok(true)
    }

    /// Persist a pair, replacing all three keys, and refresh the mirrored cookie.
    pub fn set(&self, pair: &CredentialPair) -> StorageResult<()> {
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            warn!("Refusing to store a credential pair with an empty token");
            return Ok(());
        }
        self.write(&Self::pair_batch(pair), pair)?;
        Ok(())
    }

    /// Normalize a sign-in or exchange response and persist exactly what it
    /// carried.
    ///
    /// Returns `None` without touching storage when the response lacks either
    /// token.
    pub fn set_from_response(&self, raw: &Value) -> StorageResult<Option<CredentialPair>> {
        let Some(pair) = complete_pair(normalize_credentials(raw)) else {
            return Ok(None);
        };
        if pair.user_id.is_none() {
            warn!("Response did not contain a user id");
        }
        self.set(&pair)?;
        Ok(Some(pair))
    }

    /// Persist a refresh response obtained with `used_refresh_token`.
    ///
    /// The write only happens if that refresh token is still the stored one.
    /// A missing user id is repaired from the stored one, which belongs to the
    /// same session.
    pub fn set_from_refresh(
        &self,
        raw: &Value,
        used_refresh_token: &str,
    ) -> StorageResult<RefreshedCredentials> {
        let Some(mut pair) = complete_pair(normalize_credentials(raw)) else {
            return Ok(RefreshedCredentials::Incomplete);
        };
        if pair.user_id.is_none() {
            pair.user_id = self.user_id()?;
        }

        let stored = {
            let batch = Self::pair_batch(&pair)
                .expect(StorageKeys::REFRESH_TOKEN, Some(used_refresh_token));
            self.write(&batch, &pair)?
        };
        if stored {
            Ok(RefreshedCredentials::Stored(pair))
        } else {
            Ok(RefreshedCredentials::Superseded)
        }
    }

    /// Remove the pair and user id, and expire the mirrored cookie.
    pub fn clear(&self) -> StorageResult<()> {
        self.storage.delete_many(&StorageKeys::CREDENTIAL_KEYS)?;
        self.cookies.expire(StorageKeys::AUTH_COOKIE);
        info!("Cleared stored credentials");
        Ok(())
    }

    /// Clear only if `refresh_token` is still the stored refresh token.
    ///
    /// Returns whether anything was cleared.
    pub fn clear_if_current(&self, refresh_token: Option<&str>) -> StorageResult<bool> {
        let batch = StorageKeys::CREDENTIAL_KEYS
            .iter()
            .fold(
                StorageBatch::new().expect(StorageKeys::REFRESH_TOKEN, refresh_token),
                |batch, key| batch.delete(*key),
            );
        if !self.storage.apply(&batch)? {
            return Ok(false);
        }
        self.cookies.expire(StorageKeys::AUTH_COOKIE);
        info!("Cleared stored credentials");
        Ok(true)
    }
}

fn complete_pair(normalized: NormalizedCredentials) -> Option<CredentialPair> {
    match (normalized.access_token, normalized.refresh_token) {
        (Some(access_token), Some(refresh_token)) => Some(CredentialPair {
            access_token,
            refresh_token,
            user_id: normalized.user_id,
        }),
        _ => {
            warn!("Response did not contain a complete credential pair; nothing stored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCookieMirror, MemoryStorage};
    use serde_json::json;

    fn store() -> (CredentialStore, Arc<MemoryCookieMirror>) {
        let cookies = Arc::new(MemoryCookieMirror::new());
        let store = CredentialStore::new(Box::new(MemoryStorage::new()), cookies.clone(), 120);
        (store, cookies)
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let (store, _) = store();
        let pair = CredentialPair {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            user_id: Some("7".to_string()),
        };

        store.set(&pair).unwrap();
        assert_eq!(store.get().unwrap(), Some(pair));
    }

    #[test]
    fn test_normalizes_snake_case_refresh_token() {
        let (store, _) = store();
        let raw = json!({ "accessToken": "a", "refresh_token": "snake", "userId": "u1" });

        store.set_from_response(&raw).unwrap();
        assert_eq!(store.refresh_token().unwrap(), Some("snake".to_string()));
    }

    #[test]
    fn test_user_id_priority_order() {
        let raw = json!({ "id": 1, "user_id": "2", "userid": "3" });
        assert_eq!(normalize_credentials(&raw).user_id, Some("1".to_string()));

        let raw = json!({ "userid": "3", "user_id": "2" });
        assert_eq!(normalize_credentials(&raw).user_id, Some("2".to_string()));

        let raw = json!({ "userId": "0", "id": 1 });
        assert_eq!(normalize_credentials(&raw).user_id, Some("0".to_string()));
    }

    #[test]
    fn test_user_id_from_nested_user() {
        let raw = json!({ "accessToken": "a", "refreshToken": "r", "user": { "id": 99 } });
        assert_eq!(normalize_credentials(&raw).user_id, Some("99".to_string()));
    }

    #[test]
    fn test_partial_response_is_not_stored() {
        let (store, cookies) = store();
        let stored = store
            .set_from_response(&json!({ "accessToken": "only-access", "id": 5 }))
            .unwrap();

        assert!(stored.is_none());
        assert!(store.get().unwrap().is_none());
        assert!(!store.has_session());
        assert!(cookies.current().is_none());
    }

    #[test]
    fn test_round_trip_without_user_id_after_one_was_stored() {
        let (store, _) = store();
        store
            .set(&CredentialPair {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
                user_id: Some("alice".to_string()),
            })
            .unwrap();

        let pair = CredentialPair {
            access_token: "a2".to_string(),
            refresh_token: "r2".to_string(),
            user_id: None,
        };
        store.set(&pair).unwrap();

        assert_eq!(store.get().unwrap(), Some(pair));
        assert!(store.user_id().unwrap().is_none());
    }

    #[test]
    fn test_sign_in_without_user_id_does_not_inherit_previous_one() {
        let (store, _) = store();
        store
            .set_from_response(&json!({ "accessToken": "a-alice", "refreshToken": "r-alice", "id": "alice" }))
            .unwrap();
        let pair = store
            .set_from_response(&json!({ "accessToken": "a-bob", "refreshToken": "r-bob" }))
            .unwrap()
            .unwrap();

        assert_eq!(pair.user_id, None);
        assert!(store.user_id().unwrap().is_none());
    }

    #[test]
    fn test_refresh_without_user_id_keeps_stored_one() {
        let (store, _) = store();
        store
            .set_from_response(&json!({ "accessToken": "a1", "refreshToken": "r1", "id": "u" }))
            .unwrap();
        let refreshed = store
            .set_from_refresh(&json!({ "access_token": "a2", "refresh_token": "r2" }), "r1")
            .unwrap();

        let RefreshedCredentials::Stored(pair) = refreshed else {
            panic!("expected stored pair, got {refreshed:?}");
        };
        assert_eq!(pair.access_token, "a2");
        assert_eq!(pair.user_id, Some("u".to_string()));
        assert_eq!(store.get().unwrap(), Some(pair));
    }

    #[test]
    fn test_refresh_after_sign_out_is_not_stored() {
        let (store, cookies) = store();
        store
            .set_from_response(&json!({ "accessToken": "a1", "refreshToken": "r1", "id": "u" }))
            .unwrap();
        store.clear().unwrap();

        let refreshed = store
            .set_from_refresh(&json!({ "accessToken": "a2", "refreshToken": "r2" }), "r1")
            .unwrap();

        assert_eq!(refreshed, RefreshedCredentials::Superseded);
        assert!(store.get().unwrap().is_none());
        assert!(cookies.current().is_none());
    }

    #[test]
    fn test_clear_if_current_leaves_newer_session() {
        let (store, _) = store();
        store
            .set_from_response(&json!({ "accessToken": "a2", "refreshToken": "r2", "id": "u" }))
            .unwrap();

        assert!(!store.clear_if_current(Some("r1")).unwrap());
        assert!(store.has_session());

        assert!(store.clear_if_current(Some("r2")).unwrap());
        assert!(!store.has_session());
    }

    #[test]
    fn test_set_mirrors_cookie_and_clear_expires_it() {
        let (store, cookies) = store();
        store
            .set_from_response(&json!({ "accessToken": "a", "refreshToken": "r", "id": 1 }))
            .unwrap();
        assert_eq!(
            cookies.current().unwrap().header_value(),
            "Authorization=Bearer a; Path=/; Max-Age=120; SameSite=Strict"
        );

        store.clear().unwrap();
        assert!(cookies.current().is_none());
        assert!(store.get().unwrap().is_none());
        assert!(store.user_id().unwrap().is_none());
    }

    #[test]
    fn test_has_session_tracks_access_token() {
        let (store, _) = store();
        assert!(!store.has_session());

        store
            .set(&CredentialPair {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                user_id: None,
            })
            .unwrap();
        assert!(store.has_session());

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.has_session());
    }

    #[test]
    fn test_empty_tokens_are_ignored() {
        let (store, _) = store();
        store
            .set_from_response(&json!({ "accessToken": "", "refreshToken": "r" }))
            .unwrap();
        assert!(!store.has_session());
    }
}
