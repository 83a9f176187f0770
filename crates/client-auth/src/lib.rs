//! Client-side session management for the Townsquare API.
//!
//! This crate provides:
//! - [`SessionTransport`]: HTTP transport that attaches the stored access token
//!   and refreshes it transparently on 401, at most one refresh at a time
//! - [`ExchangeClient`]: password sign-in, sign-up, and identity-token exchange
//! - [`SessionContext`]: the in-memory session state, kept in step with the
//!   credential store

mod api;
mod context;
mod error;
mod exchange;
mod refresh;
mod session_fsm;
mod transport;

pub use api::{ApiRequest, Endpoints, SignUpAck, SignUpRequest, User};
pub use context::{SessionContext, SessionEvent, SessionReader, SessionSnapshot, SessionState};
pub use error::{AuthError, AuthResult};
pub use exchange::{ExchangeClient, ExchangeTransport, SignedIn};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshPhase};
pub use session_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
pub use transport::{SessionExpiredHook, SessionTransport};
