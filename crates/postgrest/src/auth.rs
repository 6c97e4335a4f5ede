use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::rest::is_retryable_status;
use crate::retry::{Retryable, TimedOut};

/// Client for the data store's password authentication endpoints.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl AuthClient {
    /// Creates a client rooted at `base_url` (for example `https://host/auth/v1/`).
    pub fn new(base_url: Url, api_key: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Exchanges an email and password for a session.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let mut url = self.base_url.join("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        parse_json(response).await
    }

    /// Obtains a fresh access token using a refresh token.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let mut url = self.base_url.join("token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        parse_json(response).await
    }

    /// Creates an account. The store returns a session only when it confirms
    /// new accounts automatically.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let url = self.base_url.join("signup")?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "full_name": full_name }
            }))
            .send()
            .await?;

        parse_json(response).await
    }

    /// Revokes the refresh tokens of the session behind `access_token`.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let url = self.base_url.join("logout")?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

/// Session issued by the token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: AuthUser,
}

impl AuthSession {
    /// Computes the access token expiry relative to the provided instant.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in as i64)
    }
}

/// Authenticated identity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of [`AuthClient::sign_up`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SignUpOutcome {
    Session(AuthSession),
    /// Account created but awaiting email confirmation.
    Pending(AuthUser),
}

impl SignUpOutcome {
    pub fn user(&self) -> &AuthUser {
        match self {
            Self::Session(session) => &session.user,
            Self::Pending(user) => user,
        }
    }
}

/// Error body shapes used by the authentication API across versions.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Errors returned by the authentication client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth call {0}")]
    Timeout(TimedOut),
    #[error("auth request failed with {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        code: Option<String>,
    },
}

impl AuthError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            Self::Timeout(_) => Some(StatusCode::GATEWAY_TIMEOUT),
            Self::Url(_) => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` when the store rejected the supplied credentials or token.
    pub fn is_rejected_credentials(&self) -> bool {
        match self {
            Self::Api { status, code, .. } => {
                matches!(*status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED)
                    && matches!(
                        code.as_deref(),
                        Some("invalid_grant")
                            | Some("invalid_credentials")
                            | Some("refresh_token_not_found")
                            | Some("bad_jwt")
                            | None
                    )
            }
            _ => false,
        }
    }
}

impl Retryable for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Timeout(_) => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            Self::Url(_) => false,
        }
    }
}

impl From<TimedOut> for AuthError {
    fn from(value: TimedOut) -> Self {
        Self::Timeout(value)
    }
}

async fn error_from_response(response: Response) -> AuthError {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"));
    let body: AuthErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .error_description
        .or(body.msg)
        .or(body.message)
        .unwrap_or(text);
    AuthError::Api {
        status,
        message,
        code: body.error_code.or(body.error),
    }
}

async fn parse_json<T>(response: Response) -> Result<T, AuthError>
where
    T: DeserializeOwned,
{
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method as MockMethod;

    fn client(server: &MockServer) -> AuthClient {
        let base = Url::parse(&server.url("/auth/v1/")).expect("url");
        AuthClient::new(base, "anon-key", Client::builder().build().expect("client"))
    }

    fn session_body(access: &str) -> serde_json::Value {
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": { "id": "u-1", "email": "ops@market.example", "aud": "authenticated" }
        })
    }

    #[tokio::test]
    async fn sign_in_posts_password_grant() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(MockMethod::POST)
                    .path("/auth/v1/token")
                    .query_param("grant_type", "password")
                    .header("apikey", "anon-key")
                    .json_body(json!({ "email": "ops@market.example", "password": "Secret123" }));
                then.status(200).json_body(session_body("access-1"));
            })
            .await;

        let session = client
            .sign_in_with_password("ops@market.example", "Secret123")
            .await
            .expect("sign in");
        mock.assert_async().await;

        assert_eq!(session.access_token, "access-1");
        assert_eq!(session.user.id, "u-1");
        let now = Utc::now();
        assert_eq!(session.expires_at(now), now + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn invalid_credentials_are_classified() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(MockMethod::POST).path("/auth/v1/token");
                then.status(400).json_body(json!({
                    "error": "invalid_grant",
                    "error_description": "Invalid login credentials"
                }));
            })
            .await;

        let err = client
            .sign_in_with_password("ops@market.example", "wrong")
            .await
            .expect_err("should fail");
        assert!(err.is_rejected_credentials());
        assert!(!err.is_retryable());
        match err {
            AuthError::Api { message, code, .. } => {
                assert_eq!(message, "Invalid login credentials");
                assert_eq!(code.as_deref(), Some("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_up_without_confirmation_returns_pending_user() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(MockMethod::POST)
                    .path("/auth/v1/signup")
                    .json_body(json!({
                        "email": "new@market.example",
                        "password": "Secret123",
                        "data": { "full_name": "New Admin" }
                    }));
                then.status(200).json_body(json!({
                    "id": "u-9",
                    "email": "new@market.example",
                    "confirmation_sent_at": "2024-03-01T10:00:00Z"
                }));
            })
            .await;

        let outcome = client
            .sign_up("new@market.example", "Secret123", "New Admin")
            .await
            .expect("sign up");
        mock.assert_async().await;

        assert!(matches!(outcome, SignUpOutcome::Pending(_)));
        assert_eq!(outcome.user().id, "u-9");
    }

    #[tokio::test]
    async fn sign_up_with_autoconfirm_returns_session() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(MockMethod::POST).path("/auth/v1/signup");
                then.status(200).json_body(session_body("access-2"));
            })
            .await;

        let outcome = client
            .sign_up("new@market.example", "Secret123", "New Admin")
            .await
            .expect("sign up");
        assert!(matches!(outcome, SignUpOutcome::Session(ref s) if s.access_token == "access-2"));
    }

    #[tokio::test]
    async fn refresh_and_sign_out_use_bearer_tokens() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let refresh = server
            .mock_async(|when, then| {
                when.method(MockMethod::POST)
                    .path("/auth/v1/token")
                    .query_param("grant_type", "refresh_token")
                    .json_body(json!({ "refresh_token": "refresh-1" }));
                then.status(200).json_body(session_body("access-3"));
            })
            .await;
        let logout = server
            .mock_async(|when, then| {
                when.method(MockMethod::POST)
                    .path("/auth/v1/logout")
                    .header("Authorization", "Bearer access-3");
                then.status(204);
            })
            .await;

        let session = client.refresh_session("refresh-1").await.expect("refresh");
        client
            .sign_out(&session.access_token)
            .await
            .expect("sign out");

        refresh.assert_async().await;
        logout.assert_async().await;
    }

    #[tokio::test]
    async fn newer_error_shape_is_understood() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(MockMethod::POST).path("/auth/v1/logout");
                then.status(403).json_body(json!({
                    "code": 403,
                    "error_code": "bad_jwt",
                    "msg": "invalid JWT"
                }));
            })
            .await;

        let err = client.sign_out("expired").await.expect_err("bad token");
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.code(), Some("bad_jwt"));
        assert!(!err.is_rejected_credentials());
    }
}
