//! Back-office sessions.
//!
//! The browser only ever holds an opaque random token. The `admin_sessions`
//! row carrying the store tokens is keyed by the token's SHA-256 digest.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use market_admin_storage::{AdminSession, SessionTokenUpdate};

use crate::{auth::load_profile, error::ServiceError, router::AppState};

pub const SESSION_COOKIE: &str = "admin_session";

/// Store tokens this close to expiry are refreshed before use.
const REFRESH_LEEWAY_SECS: i64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub cookie_secure: bool,
}

/// The signed-in operator, attached to every gated request.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub token_hash: String,
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extracts the session token from the `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str, settings: &SessionSettings) -> String {
    cookie(token, settings.ttl.num_seconds(), settings.cookie_secure)
}

pub fn clear_cookie(settings: &SessionSettings) -> String {
    cookie("", 0, settings.cookie_secure)
}

fn cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Admits requests that carry a live session, refreshing store tokens that
/// are about to expire.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = session_token(request.headers()).ok_or(ServiceError::Unauthorized(
        "sign in to access the back office",
    ))?;
    let context = resolve(&state, hash_token(token)).await?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

async fn resolve(state: &AppState, token_hash: String) -> Result<AdminContext, ServiceError> {
    let now = state.now();
    let sessions = state.storage().sessions();
    let session = sessions
        .fetch_active(&token_hash, now)
        .await?
        .ok_or(ServiceError::Unauthorized("session expired"))?;

    let access_token = if session.access_expires_at - now <= Duration::seconds(REFRESH_LEEWAY_SECS)
    {
        refresh(state, &session, now).await?
    } else {
        sessions.touch(&token_hash, now).await?;
        session.access_token
    };

    Ok(AdminContext {
        token_hash,
        user_id: session.user_id,
        email: session.email,
        access_token,
        expires_at: session.expires_at,
    })
}

/// Exchanges the refresh token and re-checks the admin role with the new
/// access token. Rejection ends the session.
async fn refresh(
    state: &AppState,
    session: &AdminSession,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let sessions = state.storage().sessions();
    let refreshed = match state.auth().refresh_session(&session.refresh_token).await {
        Ok(refreshed) => refreshed,
        Err(err) if err.is_rejected_credentials() => {
            counter!("session_refresh_total", "result" => "rejected").increment(1);
            sessions.delete(&session.token_hash).await?;
            info!(stage = "session", user_id = %session.user_id, "refresh rejected; session ended");
            return Err(ServiceError::Unauthorized("session expired"));
        }
        Err(err) => {
            counter!("session_refresh_total", "result" => "error").increment(1);
            return Err(err.into());
        }
    };

    let profile = load_profile(state.rest(), &refreshed.access_token, &session.user_id).await?;
    if !profile.as_ref().is_some_and(|user| user.is_active_admin()) {
        counter!("session_refresh_total", "result" => "revoked").increment(1);
        sessions.delete(&session.token_hash).await?;
        if let Err(err) = state.auth().sign_out(&refreshed.access_token).await {
            warn!(stage = "auth", error = %err, "failed to sign out revoked operator");
        }
        info!(stage = "session", user_id = %session.user_id, "admin access revoked");
        return Err(ServiceError::Forbidden("admin access required"));
    }

    sessions
        .update_tokens(
            &session.token_hash,
            &SessionTokenUpdate {
                access_token: &refreshed.access_token,
                refresh_token: &refreshed.refresh_token,
                access_expires_at: refreshed.expires_at(now),
                refreshed_at: now,
            },
        )
        .await?;
    counter!("session_refresh_total", "result" => "success").increment(1);
    info!(stage = "session", user_id = %session.user_id, "store tokens refreshed");
    Ok(refreshed.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use httpmock::{Method::POST, MockServer};
    use market_admin_storage::NewSession;
    use serde_json::json;
    use std::sync::Arc;

    use crate::router::test_support::state;

    #[test]
    fn tokens_are_random_and_hash_is_stable() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_eq!(hash_token(&a).len(), 64);
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reads_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("x=1; admin_session=tok-123 ; y=2"),
        );
        assert_eq!(session_token(&headers), Some("tok-123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("admin_session="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn cookie_attributes_follow_settings() {
        let settings = SessionSettings {
            ttl: Duration::hours(1),
            cookie_secure: true,
        };
        let cookie = session_cookie("tok", &settings);
        assert_eq!(
            cookie,
            "admin_session=tok; Path=/; HttpOnly; SameSite=Strict; Max-Age=3600; Secure"
        );
        assert!(clear_cookie(&settings).contains("Max-Age=0"));
    }

    async fn seed(state: &AppState, token: &str, access_expires_at: DateTime<Utc>) -> String {
        let hash = hash_token(token);
        let now = state.now();
        state
            .storage()
            .sessions()
            .insert(&NewSession {
                token_hash: &hash,
                user_id: "admin-1",
                email: "ops@example.com",
                access_token: "old-access",
                refresh_token: "old-refresh",
                access_expires_at,
                created_at: now,
                expires_at: now + Duration::hours(12),
            })
            .await
            .expect("insert");
        hash
    }

    fn admin_row(status: &str) -> serde_json::Value {
        json!({
            "id": "admin-1",
            "email": "ops@example.com",
            "role": "admin",
            "status": status,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn fresh_token_is_used_as_is() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let now = Utc::now();
        let state = state(&dir, &server)
            .await
            .with_clock(Arc::new(move || now));
        let hash = seed(&state, "tok", now + Duration::hours(1)).await;

        let context = resolve(&state, hash).await.expect("context");
        assert_eq!(context.access_token, "old-access");
        assert_eq!(context.user_id, "admin-1");
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "refresh_token")
                .json_body(json!({ "refresh_token": "old-refresh" }));
            then.status(200).json_body(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
                "token_type": "bearer",
                "user": { "id": "admin-1", "email": "ops@example.com" }
            }));
        });
        let profile = server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/users")
                .query_param("id", "eq.admin-1")
                .header("Authorization", "Bearer new-access");
            then.status(200).json_body(json!([admin_row("active")]));
        });
        let now = Utc::now();
        let state = state(&dir, &server)
            .await
            .with_clock(Arc::new(move || now));
        let hash = seed(&state, "tok", now + Duration::seconds(120)).await;

        let context = resolve(&state, hash.clone()).await.expect("context");
        refresh.assert();
        profile.assert();
        assert_eq!(context.access_token, "new-access");

        let stored = state
            .storage()
            .sessions()
            .fetch_active(&hash, now)
            .await
            .expect("fetch")
            .expect("session");
        assert_eq!(stored.refresh_token, "new-refresh");
        assert!(stored.access_expires_at > now + Duration::minutes(59));
    }

    #[tokio::test]
    async fn refresh_for_demoted_admin_ends_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(200).json_body(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
                "user": { "id": "admin-1" }
            }));
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/rest/v1/users");
            then.status(200).json_body(json!([admin_row("suspended")]));
        });
        let sign_out = server.mock(|when, then| {
            when.method(POST).path("/auth/v1/logout");
            then.status(204);
        });
        let now = Utc::now();
        let state = state(&dir, &server)
            .await
            .with_clock(Arc::new(move || now));
        let hash = seed(&state, "tok", now - Duration::minutes(1)).await;

        let err = resolve(&state, hash.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        sign_out.assert();
        assert!(state
            .storage()
            .sessions()
            .fetch_active(&hash, now)
            .await
            .expect("fetch")
            .is_none());
    }

    #[tokio::test]
    async fn rejected_refresh_token_ends_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(400).json_body(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Already Used"
            }));
        });
        let now = Utc::now();
        let state = state(&dir, &server)
            .await
            .with_clock(Arc::new(move || now));
        let hash = seed(&state, "tok", now).await;

        let err = resolve(&state, hash.clone()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert!(!state
            .storage()
            .sessions()
            .delete(&hash)
            .await
            .expect("delete"));
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let state = state(&dir, &server).await;

        let err = resolve(&state, hash_token("nope")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }
}
