//! Wire model for the remote API: request descriptions and response types.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Paths of the endpoints the session manager talks to.
pub struct Endpoints;

impl Endpoints {
    pub const SIGN_IN: &'static str = "/sign-in";
    pub const SIGN_UP: &'static str = "/sign-up";
    pub const REFRESH: &'static str = "/refresh";
    pub const TOKEN_EXCHANGE: &'static str = "/google-exchange";
    pub const CURRENT_USER: &'static str = "/current-user";
}

/// Fields that belong to the credential pair, never to the user summary.
const CREDENTIAL_FIELDS: &[&str] = &[
    "accessToken",
    "access_token",
    "token",
    "refreshToken",
    "refresh_token",
];

/// A replayable description of one API call.
///
/// The transport rebuilds the HTTP request from this on every attempt, so a
/// retry after refresh carries the new access token.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) anonymous: bool,
    pub(crate) retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            anonymous: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Never attach stored credentials and never enter refresh on 401.
    ///
    /// Used by the sign-in, exchange, and refresh calls themselves.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Whether this request already used its one post-refresh retry.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Whether the caller supplied its own `Authorization` header.
    pub fn has_authorization_header(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// User profile as returned by `/current-user` and embedded in sign-in replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "avatarUrl",
        alias = "avatar_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_url: Option<String>,
    /// Every other profile field, kept so patches round-trip them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Build the user summary carried by a sign-in or exchange response.
    ///
    /// Prefers a nested `user` object; otherwise reads the top-level object
    /// minus its credential fields. `user_id` fills a missing `id`.
    pub fn from_credential_response(raw: &Value, user_id: Option<&str>) -> Self {
        let source = match raw.get("user") {
            Some(user @ Value::Object(_)) => user.clone(),
            _ => {
                let mut top = raw.as_object().cloned().unwrap_or_default();
                for field in CREDENTIAL_FIELDS {
                    top.remove(*field);
                }
                Value::Object(top)
            }
        };

        let mut user: User = serde_json::from_value(source).unwrap_or_default();
        if user.id.is_none() {
            user.id = user_id.map(String::from);
        }
        user
    }

    /// Apply a partial profile update in place.
    ///
    /// Keys in `patch` overwrite existing fields; a `null` value removes an
    /// optional field.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            let key = if key == "avatar_url" { "avatarUrl" } else { key.as_str() };
            if value.is_null() {
                current.remove(key);
            } else {
                current.insert(key.to_string(), value.clone());
            }
        }
        *self = serde_json::from_value(Value::Object(current))?;
        Ok(())
    }
}

/// Registration fields for password sign-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any further registration fields the API accepts.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignUpRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Acknowledgment that a sign-up is pending email verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignUpAck {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub pending_verification: bool,
    /// True when the API was unreachable and this acknowledgment was
    /// synthesized locally.
    pub offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

const PENDING_VERIFICATION_MESSAGE: &str = "Check your email to verify your account";

impl SignUpAck {
    /// Acknowledgment parsed from the API's sign-up response.
    pub fn from_response(raw: &Value, email: &str) -> Self {
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(PENDING_VERIFICATION_MESSAGE)
            .to_string();
        let email = raw
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or(email)
            .to_string();
        let reference = raw
            .get("id")
            .or_else(|| raw.get("userId"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Self {
            message,
            email: Some(email),
            pending_verification: true,
            offline: false,
            reference,
        }
    }

    /// Locally synthesized acknowledgment for when the API is unreachable.
    pub fn offline(email: &str) -> Self {
        Self {
            message: PENDING_VERIFICATION_MESSAGE.to_string(),
            email: Some(email.to_string()),
            pending_verification: true,
            offline: true,
            reference: Some(format!("offline-{}", uuid::Uuid::new_v4())),
        }
    }
}

/// Best human-readable message from an error response body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for field in ["message", "error_description", "error", "detail"] {
            if let Some(message) = value.get(field).and_then(Value::as_str) {
                if !message.trim().is_empty() {
                    return message.to_string();
                }
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .map(String::from)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Drain a non-success response into `(status, message)`.
pub(crate) async fn read_error(response: reqwest::Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (status, error_message(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_prefers_message_field() {
        let msg = error_message(StatusCode::BAD_REQUEST, r#"{"message":"Invalid credentials"}"#);
        assert_eq!(msg, "Invalid credentials");
    }

    #[test]
    fn test_error_message_falls_back_to_body_then_reason() {
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_message(StatusCode::UNAUTHORIZED, ""), "Unauthorized");
    }

    #[test]
    fn test_user_summary_strips_credentials() {
        let raw = json!({
            "accessToken": "a",
            "refreshToken": "r",
            "id": 12,
            "email": "a@b.com",
            "role": "USER"
        });
        let user = User::from_credential_response(&raw, Some("12"));

        assert_eq!(user.id.as_deref(), Some("12"));
        assert_eq!(user.email.as_deref(), Some("a@b.com"));
        assert_eq!(user.extra.get("role"), Some(&json!("USER")));
        assert!(!user.extra.contains_key("accessToken"));
    }

    #[test]
    fn test_user_summary_prefers_nested_user() {
        let raw = json!({
            "accessToken": "a",
            "refreshToken": "r",
            "user": { "id": "u-1", "name": "Ada", "avatar_url": "https://img/1.png" }
        });
        let user = User::from_credential_response(&raw, None);

        assert_eq!(user.id.as_deref(), Some("u-1"));
        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://img/1.png"));
    }

    #[test]
    fn test_apply_patch_updates_and_removes() {
        let mut user = User {
            id: Some("1".to_string()),
            name: Some("Ada".to_string()),
            avatar_url: Some("old.png".to_string()),
            ..User::default()
        };
        let patch = json!({ "avatarUrl": "new.png", "name": null, "city": "Lviv" });
        user.apply_patch(patch.as_object().unwrap()).unwrap();

        assert_eq!(user.avatar_url.as_deref(), Some("new.png"));
        assert!(user.name.is_none());
        assert_eq!(user.id.as_deref(), Some("1"));
        assert_eq!(user.extra.get("city"), Some(&json!("Lviv")));
    }

    #[test]
    fn test_request_detects_explicit_authorization() {
        let req = ApiRequest::post("/x").header("authorization", "Bearer t");
        assert!(req.has_authorization_header());
        assert!(!ApiRequest::get("/x").has_authorization_header());
    }

    #[test]
    fn test_offline_ack_is_marked() {
        let ack = SignUpAck::offline("a@b.com");
        assert!(ack.offline);
        assert!(ack.pending_verification);
        assert!(ack.reference.unwrap().starts_with("offline-"));
    }
}
