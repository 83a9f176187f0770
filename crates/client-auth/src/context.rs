//! Session context: the one writable view of who is signed in.
//!
//! `SessionContext` owns the in-memory session state and is the only handle
//! that can change it. Store writes and state updates for a sign-in happen
//! under the same lock, so a reader never sees a stored pair without the user
//! it belongs to. The lock is never held across an `.await`.
//!
//! Whether the user is authenticated is read from the credential store every
//! time it is asked, not cached.

use crate::api::{ApiRequest, Endpoints, SignUpAck, SignUpRequest, User};
use crate::exchange::{ExchangeClient, ExchangeTransport};
use crate::session_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::transport::SessionTransport;
use crate::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// In-memory session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub current_user: Option<User>,
    /// True while any session operation is in flight.
    pub loading: bool,
    /// Message of the most recent failed operation.
    pub error: Option<String>,
    /// When the user, phase, or error last changed.
    pub updated_at: DateTime<Utc>,
}

/// Session state plus the phase and the store-derived authentication flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub authenticated: bool,
    #[serde(flatten)]
    pub state: SessionState,
}

/// Broadcast whenever the phase or the current user changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub phase: SessionPhase,
    pub user_id: Option<String>,
    pub at: DateTime<Utc>,
}

struct ContextState {
    fsm: SessionMachine,
    current_user: Option<User>,
    pending: usize,
    error: Option<String>,
    updated_at: DateTime<Utc>,
    hydration_started: bool,
}

impl ContextState {
    fn new() -> Self {
        Self {
            fsm: SessionMachine::new(),
            current_user: None,
            pending: 0,
            error: None,
            updated_at: Utc::now(),
            hydration_started: false,
        }
    }

    fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.fsm.state())
    }

    fn view(&self) -> SessionState {
        SessionState {
            current_user: self.current_user.clone(),
            loading: self.pending > 0,
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Apply an input; an impossible transition is logged and ignored.
    fn apply(&mut self, input: &SessionMachineInput) -> bool {
        match self.fsm.consume(input) {
            Ok(_) => true,
            Err(_) => {
                debug!(input = ?input, phase = ?self.phase(), "Ignoring session transition");
                false
            }
        }
    }
}

struct ContextInner {
    transport: SessionTransport,
    exchange: ExchangeClient,
    state: Mutex<ContextState>,
    events: broadcast::Sender<SessionEvent>,
}

/// Marks an operation in flight for as long as it lives.
struct Pending<'a> {
    inner: &'a ContextInner,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.pending = state.pending.saturating_sub(1);
    }
}

impl ContextInner {
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Pending<'_> {
        self.lock().pending += 1;
        Pending { inner: self }
    }

    /// Run `f` under the state lock and broadcast if the phase or user changed.
    fn update<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let (result, event) = {
            let mut state = self.lock();
            let phase_before = state.phase();
            let user_before = state.current_user.clone();
            let error_before = state.error.clone();

            let result = f(&mut state);

            let now = Utc::now();
            if state.error != error_before {
                state.updated_at = now;
            }
            let changed = state.phase() != phase_before || state.current_user != user_before;
            let event = changed.then(|| {
                state.updated_at = now;
                SessionEvent {
                    phase: state.phase(),
                    user_id: state.current_user.as_ref().and_then(|u| u.id.clone()),
                    at: now,
                }
            });
            (result, event)
        };

        if let Some(event) = event {
            debug!(phase = ?event.phase, user_id = ?event.user_id, "Session changed");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        result
    }

    fn phase(&self) -> SessionPhase {
        self.lock().phase()
    }

    fn state(&self) -> SessionState {
        self.lock().view()
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            phase: state.phase(),
            authenticated: self.transport.is_authenticated(),
            state: state.view(),
        }
    }

    /// Session-expired hook: the transport already cleared the store.
    fn expire(&self, reason: &str) {
        self.update(|state| {
            if state.apply(&SessionMachineInput::SessionExpired) {
                state.current_user = None;
                state.error = Some(format!("Session expired: {reason}"));
                info!("Session expired; signed out");
            }
        });
    }

    /// Store a sign-in response and record the user in one step.
    fn commit_sign_in(&self, result: AuthResult<Value>) -> AuthResult<User> {
        self.update(|state| {
            match result.and_then(|raw| self.exchange.persist(&raw)) {
                Ok(signed_in) => {
                    state.error = None;
                    state.current_user = Some(signed_in.user.clone());
                    state.apply(&SessionMachineInput::SignedIn);
                    Ok(signed_in.user)
                }
                Err(e) => {
                    state.error = Some(e.to_string());
                    Err(e)
                }
            }
        })
    }
}

macro_rules! session_readers {
    ($ty:ty) => {
        impl $ty {
            /// Current phase of the session lifecycle.
            pub fn phase(&self) -> SessionPhase {
                self.inner.phase()
            }

            /// Whether an access token is stored right now.
            pub fn is_authenticated(&self) -> bool {
                self.inner.transport.is_authenticated()
            }

            pub fn current_user(&self) -> Option<User> {
                self.inner.lock().current_user.clone()
            }

            pub fn loading(&self) -> bool {
                self.inner.lock().pending > 0
            }

            pub fn error(&self) -> Option<String> {
                self.inner.lock().error.clone()
            }

            pub fn state(&self) -> SessionState {
                self.inner.state()
            }

            pub fn snapshot(&self) -> SessionSnapshot {
                self.inner.snapshot()
            }

            /// Receive an event for every phase or user change.
            pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
                self.inner.events.subscribe()
            }
        }
    };
}

/// Read-only handle onto a session context.
#[derive(Clone)]
pub struct SessionReader {
    inner: Arc<ContextInner>,
}

/// The writable session handle.
pub struct SessionContext {
    inner: Arc<ContextInner>,
}

session_readers!(SessionReader);
session_readers!(SessionContext);

impl SessionContext {
    /// Create a context around `transport` and register for session expiry.
    ///
    /// The context starts in `Hydrating`; call [`hydrate`](Self::hydrate) to
    /// resolve it.
    pub fn create(transport: SessionTransport) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(ContextInner {
            exchange: ExchangeClient::new(transport.clone()),
            transport,
            state: Mutex::new(ContextState::new()),
            events,
        });

        let weak = Arc::downgrade(&inner);
        inner
            .transport
            .set_session_expired_hook(Arc::new(move |reason: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(reason);
                }
            }));

        Self { inner }
    }

    /// Unregister from the transport. Readers keep the last state.
    pub fn dispose(self) {
        self.inner.transport.clear_session_expired_hook();
        debug!("Session context disposed");
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.inner.transport
    }

    /// Resolve `Hydrating` from stored credentials.
    ///
    /// With a stored session the current user is fetched; if that fails the
    /// stored credentials are cleared and the session resolves anonymous.
    /// Runs once; later calls return the current phase.
    pub async fn hydrate(&self) -> SessionPhase {
        {
            let mut state = self.inner.lock();
            if state.hydration_started || state.phase() != SessionPhase::Hydrating {
                return state.phase();
            }
            state.hydration_started = true;
        }
        let _pending = self.inner.begin();

        if !self.inner.transport.is_authenticated() {
            info!("No stored session");
            return self.inner.update(|state| {
                state.apply(&SessionMachineInput::NoSession);
                state.phase()
            });
        }

        let result = self
            .inner
            .transport
            .send_json::<User>(ApiRequest::get(Endpoints::CURRENT_USER))
            .await;

        self.inner.update(|state| {
            if state.phase() != SessionPhase::Hydrating {
                debug!(phase = ?state.phase(), "Session resolved during hydration");
                return state.phase();
            }
            match result {
                Ok(user) => {
                    info!(user_id = ?user.id, "Session restored");
                    state.current_user = Some(user);
                    state.apply(&SessionMachineInput::ProfileLoaded);
                }
                Err(e) => {
                    warn!(error = %e, "Could not restore session; signing out");
                    if let Err(clear_err) = self.inner.transport.credentials().clear() {
                        warn!(error = %clear_err, "Failed to clear stored credentials");
                    }
                    state.current_user = None;
                    state.error = Some(e.to_string());
                    state.apply(&SessionMachineInput::HydrationFailed);
                }
            }
            state.phase()
        })
    }

    /// Sign in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        let _pending = self.inner.begin();
        let result = self.inner.exchange.request_sign_in(email, password).await;
        self.inner.commit_sign_in(result)
    }

    /// Sign in with a third-party identity token.
    pub async fn sign_in_with_exchange(
        &self,
        via: ExchangeTransport,
        id_token: &str,
        lang: &str,
    ) -> AuthResult<User> {
        let _pending = self.inner.begin();
        let result = self
            .inner
            .exchange
            .request_token_exchange(via, id_token, lang)
            .await;
        self.inner.commit_sign_in(result)
    }

    /// Token exchange with the token in the request body.
    pub async fn sign_in_with_token_body(&self, id_token: &str, lang: &str) -> AuthResult<User> {
        self.sign_in_with_exchange(ExchangeTransport::Body, id_token, lang)
            .await
    }

    /// Token exchange with the token as a bearer header.
    pub async fn sign_in_with_token_header(&self, id_token: &str, lang: &str) -> AuthResult<User> {
        self.sign_in_with_exchange(ExchangeTransport::Header, id_token, lang)
            .await
    }

    /// Token exchange with the token in the query string.
    pub async fn sign_in_with_token_query(&self, id_token: &str, lang: &str) -> AuthResult<User> {
        self.sign_in_with_exchange(ExchangeTransport::Query, id_token, lang)
            .await
    }

    /// Register a new account. Never changes who is signed in.
    pub async fn sign_up(&self, request: &SignUpRequest) -> AuthResult<SignUpAck> {
        let _pending = self.inner.begin();
        let result = self.inner.exchange.sign_up(request).await;
        self.inner.update(|state| match &result {
            Ok(_) => state.error = None,
            Err(e) => state.error = Some(e.to_string()),
        });
        result
    }

    /// Clear stored credentials and the current user. No network call.
    pub fn sign_out(&self) {
        self.inner.update(|state| {
            if let Err(e) = self.inner.transport.credentials().clear() {
                warn!(error = %e, "Failed to clear stored credentials");
            }
            state.current_user = None;
            state.error = None;
            state.apply(&SessionMachineInput::SignedOut);
        });
        info!("Signed out");
    }

    /// Re-fetch the current user from the API.
    pub async fn fetch_current_user(&self) -> AuthResult<User> {
        let _pending = self.inner.begin();
        let result = self
            .inner
            .transport
            .send_json::<User>(ApiRequest::get(Endpoints::CURRENT_USER))
            .await;

        self.inner.update(|state| match result {
            Ok(user) => {
                if state.apply(&SessionMachineInput::ProfileUpdated) {
                    state.current_user = Some(user.clone());
                }
                Ok(user)
            }
            Err(e) => {
                state.error = Some(e.to_string());
                Err(e)
            }
        })
    }

    /// Merge `patch` into the in-memory user. Local only; nothing is sent.
    ///
    /// Returns `None` when nobody is signed in.
    pub fn update_user_profile(&self, patch: &Map<String, Value>) -> AuthResult<Option<User>> {
        self.inner.update(|state| {
            let Some(user) = state.current_user.as_mut() else {
                debug!("No current user to update");
                return Ok(None);
            };
            user.apply_patch(patch).map_err(AuthError::from)?;
            let updated = user.clone();
            state.apply(&SessionMachineInput::ProfileUpdated);
            Ok(Some(updated))
        })
    }
}
