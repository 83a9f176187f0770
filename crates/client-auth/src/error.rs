//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad email/password or rejected identity token; message is the API's own.
    #[error("{0}")]
    InvalidCredentials(String),

    /// A refresh was needed but no refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// No response was received (DNS, connection refused, timeout)
    #[error("Network unavailable: {0}")]
    TransportUnavailable(String),

    /// The API answered 401 and the session could not be recovered
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The refresh call itself failed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Any other non-success API response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A success response that lacks what the flow needs (e.g. no tokens)
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] client_storage::StorageError),

    /// HTTP error after a response was received (e.g. body decoding)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Map a `send()` failure. Such errors never carry a response object.
    pub(crate) fn from_send(error: reqwest::Error) -> Self {
        AuthError::TransportUnavailable(error.to_string())
    }

    /// Returns true if this error is transient and the operation can be retried
    /// by the caller. Nothing in this crate retries automatically.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::TransportUnavailable(_) => true,
            AuthError::Api { status, .. } => *status >= 500,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
