//! Authorization cookie mirror.
//!
//! A co-located request-forwarding layer authenticates with a cookie rather
//! than reading the credential store. The mirror keeps that cookie in step
//! with the stored access token and expires it on sign-out.

use crate::StorageKeys;
use reqwest::cookie::Jar;
use reqwest::Url;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Rendered authorization cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
    pub max_age_secs: u64,
}

impl AuthCookie {
    /// Cookie holding `Bearer <access_token>`.
    pub fn bearer(access_token: &str, max_age_secs: u64) -> Self {
        Self {
            name: StorageKeys::AUTH_COOKIE.to_string(),
            value: format!("Bearer {}", access_token),
            max_age_secs,
        }
    }

    /// Set-Cookie representation.
    pub fn header_value(&self) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Strict",
            self.name, self.value, self.max_age_secs
        )
    }

    /// Set-Cookie representation that expires a cookie named `name` immediately.
    pub fn expired_header_value(name: &str) -> String {
        format!("{}=; Path=/; Max-Age=0; SameSite=Strict", name)
    }
}

/// Sink for the mirrored authorization cookie.
pub trait CookieMirror: Send + Sync {
    /// Write or replace the cookie.
    fn set(&self, cookie: &AuthCookie);

    /// Expire the cookie named `name`.
    fn expire(&self, name: &str);
}

/// Mirror that writes into a reqwest cookie jar.
///
/// Hand the same jar to the forwarding client via
/// `reqwest::ClientBuilder::cookie_provider`.
pub struct JarCookieMirror {
    jar: Arc<Jar>,
    url: Url,
}

impl JarCookieMirror {
    pub fn new(jar: Arc<Jar>, url: Url) -> Self {
        Self { jar, url }
    }

    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }
}

impl CookieMirror for JarCookieMirror {
    fn set(&self, cookie: &AuthCookie) {
        self.jar.add_cookie_str(&cookie.header_value(), &self.url);
        debug!(cookie = %cookie.name, url = %self.url, "Mirrored auth cookie");
    }

    fn expire(&self, name: &str) {
        self.jar
            .add_cookie_str(&AuthCookie::expired_header_value(name), &self.url);
        debug!(cookie = %name, url = %self.url, "Expired auth cookie");
    }
}

/// Mirror that remembers the Set-Cookie values it was given.
#[derive(Default)]
pub struct MemoryCookieMirror {
    headers: Mutex<Vec<String>>,
    current: Mutex<Option<AuthCookie>>,
}

impl MemoryCookieMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live cookie, if one is set and not expired.
    pub fn current(&self) -> Option<AuthCookie> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Every Set-Cookie value written so far, oldest first.
    pub fn headers(&self) -> Vec<String> {
        self.headers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CookieMirror for MemoryCookieMirror {
    fn set(&self, cookie: &AuthCookie) {
        self.headers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(cookie.header_value());
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cookie.clone());
    }

    fn expire(&self, name: &str) {
        self.headers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(AuthCookie::expired_header_value(name));
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.as_ref().is_some_and(|c| c.name == name) {
            *current = None;
        }
    }
}

/// Mirror for deployments without a forwarding layer.
pub struct NoCookieMirror;

impl CookieMirror for NoCookieMirror {
    fn set(&self, _cookie: &AuthCookie) {}

    fn expire(&self, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_cookie_header() {
        let cookie = AuthCookie::bearer("tok", 3600);
        assert_eq!(
            cookie.header_value(),
            "Authorization=Bearer tok; Path=/; Max-Age=3600; SameSite=Strict"
        );
    }

    #[test]
    fn test_memory_mirror_expire_clears_current() {
        let mirror = MemoryCookieMirror::new();
        mirror.set(&AuthCookie::bearer("tok", 60));
        assert_eq!(mirror.current().unwrap().value, "Bearer tok");

        mirror.expire(StorageKeys::AUTH_COOKIE);
        assert!(mirror.current().is_none());
        assert_eq!(
            mirror.headers().last().unwrap(),
            "Authorization=; Path=/; Max-Age=0; SameSite=Strict"
        );
    }
}
