//! Credential exchange: password sign-in, sign-up, and identity-token exchange.
//!
//! The network half (`request_*`) and the storage half (`persist`) are split so
//! the session context can write the store and its own state in one step.

use crate::api::{ApiRequest, Endpoints, SignUpAck, SignUpRequest, User};
use crate::transport::SessionTransport;
use crate::{AuthError, AuthResult};
use client_storage::CredentialPair;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// How the third-party identity token reaches the exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeTransport {
    /// `POST` with `{"idToken", "lang"}` as the JSON body.
    Body,
    /// `POST` with the token as a bearer `Authorization` header.
    Header,
    /// `GET` with `idToken` and `lang` query parameters.
    Query,
}

impl ExchangeTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeTransport::Body => "body",
            ExchangeTransport::Header => "header",
            ExchangeTransport::Query => "query",
        }
    }
}

impl fmt::Display for ExchangeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "body" => Ok(ExchangeTransport::Body),
            "header" => Ok(ExchangeTransport::Header),
            "query" => Ok(ExchangeTransport::Query),
            other => Err(format!(
                "unknown exchange transport '{other}' (expected body, header, or query)"
            )),
        }
    }
}

/// Credentials and user summary established by a successful sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub credentials: CredentialPair,
    pub user: User,
}

/// A rejection of the submitted credentials. The API message is kept verbatim.
fn credential_rejection(error: AuthError) -> AuthError {
    match error {
        AuthError::Unauthorized(message) => AuthError::InvalidCredentials(message),
        AuthError::Api { status, message } if (400..500).contains(&status) => {
            AuthError::InvalidCredentials(message)
        }
        other => other,
    }
}

/// Client for the endpoints that establish a session.
#[derive(Clone)]
pub struct ExchangeClient {
    transport: SessionTransport,
}

impl ExchangeClient {
    pub fn new(transport: SessionTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Submit email and password. Returns the raw response without storing it.
    pub async fn request_sign_in(&self, email: &str, password: &str) -> AuthResult<Value> {
        let request = ApiRequest::post(Endpoints::SIGN_IN)
            .json(json!({ "email": email, "password": password }))
            .anonymous();
        self.transport
            .send_value(request)
            .await
            .map_err(credential_rejection)
    }

    /// Submit an identity token over the chosen transport.
    pub async fn request_token_exchange(
        &self,
        via: ExchangeTransport,
        id_token: &str,
        lang: &str,
    ) -> AuthResult<Value> {
        let request = match via {
            ExchangeTransport::Body => ApiRequest::post(Endpoints::TOKEN_EXCHANGE)
                .json(json!({ "idToken": id_token, "lang": lang })),
            ExchangeTransport::Header => ApiRequest::post(Endpoints::TOKEN_EXCHANGE)
                .header("Authorization", format!("Bearer {id_token}"))
                .json(json!({ "lang": lang })),
            ExchangeTransport::Query => ApiRequest::get(Endpoints::TOKEN_EXCHANGE)
                .query("idToken", id_token)
                .query("lang", lang),
        };

        self.transport
            .send_value(request.anonymous())
            .await
            .map_err(credential_rejection)
    }

    /// Register a new account.
    ///
    /// Sign-up never establishes a session. When the API cannot be reached a
    /// locally synthesized acknowledgment is returned instead of an error.
    pub async fn sign_up(&self, request: &SignUpRequest) -> AuthResult<SignUpAck> {
        let body = serde_json::to_value(request)?;
        let api_request = ApiRequest::post(Endpoints::SIGN_UP).json(body).anonymous();

        match self.transport.send_value(api_request).await {
            Ok(raw) => {
                info!(email = %request.email, "Sign-up accepted; verification pending");
                Ok(SignUpAck::from_response(&raw, &request.email))
            }
            Err(AuthError::TransportUnavailable(reason)) => {
                warn!(email = %request.email, %reason, "Sign-up API unreachable; acknowledging offline");
                Ok(SignUpAck::offline(&request.email))
            }
            Err(e) => Err(e),
        }
    }

    /// Store the credential pair from a sign-in or exchange response.
    ///
    /// Writes nothing when either token is missing.
    pub fn persist(&self, raw: &Value) -> AuthResult<SignedIn> {
        let credentials = self
            .transport
            .credentials()
            .set_from_response(raw)?
            .ok_or_else(|| {
                AuthError::MalformedResponse(
                    "sign-in response did not contain a credential pair".to_string(),
                )
            })?;

        self.transport.reset_refresh();
        let user = User::from_credential_response(raw, credentials.user_id.as_deref());
        info!(user_id = ?credentials.user_id, "Session established");
        Ok(SignedIn { credentials, user })
    }

    /// Sign in with email and password and store the result.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<SignedIn> {
        let raw = self.request_sign_in(email, password).await?;
        self.persist(&raw)
    }

    /// Exchange an identity token for a session and store the result.
    pub async fn exchange(
        &self,
        via: ExchangeTransport,
        id_token: &str,
        lang: &str,
    ) -> AuthResult<SignedIn> {
        let raw = self.request_token_exchange(via, id_token, lang).await?;
        self.persist(&raw)
    }
}
