//! Authenticated HTTP transport with transparent token refresh.
//!
//! Every request carries the stored access token unless it is anonymous or
//! brings its own `Authorization` header. A 401 on an authenticated request
//! joins the single in-flight refresh, and the request is replayed once with
//! the new token. When refresh fails the stored credentials are cleared and the
//! session-expired hook fires before any waiter is released.

use crate::api::{read_error, ApiRequest, Endpoints};
use crate::refresh::{RefreshCoordinator, RefreshOutcome, RefreshPhase, RefreshTicket};
use crate::{AuthError, AuthResult};
use client_config_and_utils::Config;
use client_storage::{CredentialPair, CredentialStore, RefreshedCredentials};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Called once per failed refresh, after the store has been cleared.
pub type SessionExpiredHook = Arc<dyn Fn(&str) + Send + Sync>;

enum Recovery {
    Retry,
    SignedOut,
}

struct TransportInner {
    http_client: Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    refresh: RefreshCoordinator,
    session_expired_hook: Mutex<Option<SessionExpiredHook>>,
}

/// Cheaply cloneable handle; clones share credentials and refresh state.
#[derive(Clone)]
pub struct SessionTransport {
    inner: Arc<TransportInner>,
}

impl SessionTransport {
    /// Create a transport with a default HTTP client.
    pub fn new(base_url: &str, credentials: Arc<CredentialStore>) -> Self {
        Self::with_http_client(Client::new(), base_url, credentials)
    }

    /// Create a transport around an existing HTTP client.
    pub fn with_http_client(
        http_client: Client,
        base_url: &str,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                http_client,
                base_url: base_url.trim_end_matches('/').to_string(),
                credentials,
                refresh: RefreshCoordinator::new(),
                session_expired_hook: Mutex::new(None),
            }),
        }
    }

    /// Create a transport from the client configuration.
    pub fn from_config(config: &Config, credentials: Arc<CredentialStore>) -> AuthResult<Self> {
        let base_url = config
            .api_base_url()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_http_client(
            http_client,
            base_url.as_str(),
            credentials,
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The credential store this transport reads tokens from.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    /// Whether an access token is stored right now.
    pub fn is_authenticated(&self) -> bool {
        self.inner.credentials.has_session()
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.inner.refresh.phase()
    }

    /// Number of refresh calls started by this transport.
    pub fn refreshes_started(&self) -> u64 {
        self.inner.refresh.refreshes_started()
    }

    /// Allow refresh again after new credentials were stored.
    pub fn reset_refresh(&self) {
        self.inner.refresh.reset();
    }

    pub fn set_session_expired_hook(&self, hook: SessionExpiredHook) {
        *self.inner.hook_slot() = Some(hook);
    }

    pub fn clear_session_expired_hook(&self) {
        *self.inner.hook_slot() = None;
    }

    /// Send a request, refreshing and replaying it once on 401.
    ///
    /// Returns the successful response; every non-2xx status becomes an error.
    pub async fn send(&self, mut request: ApiRequest) -> AuthResult<Response> {
        loop {
            let token = if request.is_anonymous() || request.has_authorization_header() {
                None
            } else {
                self.inner.credentials.access_token()?
            };

            let response = self.inner.dispatch(&request, token.as_deref()).await?;
            if response.status().is_success() {
                return Ok(response);
            }

            let (status, message) = read_error(response).await;
            if status != StatusCode::UNAUTHORIZED {
                debug!(path = %request.path(), status = status.as_u16(), "Request failed");
                return Err(AuthError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            if request.is_anonymous() || request.has_authorization_header() || request.is_retried()
            {
                return Err(AuthError::Unauthorized(message));
            }

            request.retried = true;
            match self.inner.recover(token.as_deref()).await {
                Recovery::Retry => {
                    debug!(path = %request.path(), "Replaying request with refreshed token");
                }
                Recovery::SignedOut => return Err(AuthError::Unauthorized(message)),
            }
        }
    }

    /// Send a request and decode its JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> AuthResult<T> {
        let response = self.send(request).await?;
        Ok(response.json::<T>().await?)
    }

    /// Send a request and return its body as raw JSON; an empty body is `null`.
    pub async fn send_value(&self, request: ApiRequest) -> AuthResult<Value> {
        let response = self.send(request).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl TransportInner {
    fn hook_slot(&self) -> std::sync::MutexGuard<'_, Option<SessionExpiredHook>> {
        self.session_expired_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> AuthResult<Response> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http_client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            warn!(method = %request.method, path = %request.path, error = %e, "Request got no response");
            AuthError::from_send(e)
        })
    }

    /// Decide how a request that just got a 401 continues.
    async fn recover(self: &Arc<Self>, sent_with: Option<&str>) -> Recovery {
        let current = match self.credentials.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                None
            }
        };

        // Another caller already refreshed after this request went out.
        if let (Some(sent), Some(current)) = (sent_with, current.as_deref()) {
            if sent != current {
                debug!("Stored token changed since request was sent");
                return Recovery::Retry;
            }
        }

        let fresh_credentials = matches!(self.credentials.refresh_token(), Ok(Some(_)));
        let rx = match self.refresh.join(fresh_credentials) {
            RefreshTicket::Leader(rx) => {
                tokio::spawn(run_refresh(Arc::clone(self)));
                rx
            }
            RefreshTicket::Follower(rx) => rx,
            RefreshTicket::Rejected => {
                debug!("Session already expired; not refreshing");
                return Recovery::SignedOut;
            }
        };

        match rx.await {
            Ok(RefreshOutcome::Refreshed { .. }) => Recovery::Retry,
            Ok(RefreshOutcome::Failed { .. }) => Recovery::SignedOut,
            Err(_) => {
                warn!("Refresh task ended without an outcome");
                Recovery::SignedOut
            }
        }
    }

    async fn refresh_credentials(&self, refresh_token: &str) -> AuthResult<CredentialPair> {
        let request = ApiRequest::get(Endpoints::REFRESH)
            .query("refreshToken", refresh_token)
            .anonymous();
        let response = self.dispatch(&request, None).await?;
        if !response.status().is_success() {
            let (status, message) = read_error(response).await;
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }
        let raw: Value = response.json().await?;

        // A sign-out or new sign-in while the call was in flight wins.
        match self.credentials.set_from_refresh(&raw, refresh_token)? {
            RefreshedCredentials::Stored(pair) => Ok(pair),
            RefreshedCredentials::Incomplete => Err(AuthError::RefreshFailed(
                "response did not contain a credential pair".to_string(),
            )),
            RefreshedCredentials::Superseded => Err(AuthError::RefreshFailed(
                "credentials changed during refresh".to_string(),
            )),
        }
    }

    fn notify_session_expired(&self, reason: &str) {
        let hook = self.hook_slot().clone();
        match hook {
            Some(hook) => hook(reason),
            None => debug!("No session-expired hook registered"),
        }
    }
}

/// Body of the spawned refresh task. Runs to completion even if every caller
/// that asked for it has gone away.
async fn run_refresh(inner: Arc<TransportInner>) {
    let used = match inner.credentials.refresh_token() {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "Failed to read refresh token");
            None
        }
    };

    let result = match used.as_deref() {
        Some(refresh_token) => inner.refresh_credentials(refresh_token).await,
        None => Err(AuthError::NoRefreshToken),
    };

    let outcome = match result {
        Ok(pair) => {
            info!(user_id = ?pair.user_id, "Access token refreshed");
            RefreshOutcome::Refreshed {
                access_token: pair.access_token,
            }
        }
        Err(e) => {
            let reason = e.to_string();
            match inner.credentials.clear_if_current(used.as_deref()) {
                Ok(true) => {
                    warn!(error = %e, "Token refresh failed; ending session");
                    inner.notify_session_expired(&reason);
                }
                Ok(false) => {
                    debug!(error = %e, "Credentials changed during refresh; leaving them in place");
                }
                Err(clear_err) => {
                    warn!(error = %clear_err, "Failed to clear credentials after refresh failure");
                    inner.notify_session_expired(&reason);
                }
            }
            RefreshOutcome::Failed { reason }
        }
    };

    let notified = inner.refresh.complete(outcome);
    debug!(notified, "Refresh waiters released");
}
