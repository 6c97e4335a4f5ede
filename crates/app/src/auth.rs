use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use market_admin_core::{
    entities::{Record, User, UserRole, UserStatus},
    validation::{LoginForm, RegistrationForm},
};
use market_admin_postgrest::{
    retry_with_backoff, with_timeout, Filter, RestClient, RestError, SelectQuery, SignUpOutcome,
};
use market_admin_storage::NewSession;

use crate::{
    error::ServiceError,
    extract::JsonBody,
    router::AppState,
    session::{
        clear_cookie, generate_token, hash_token, session_cookie, session_token, AdminContext,
    },
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    pub user_id: String,
    pub email: String,
    pub status: UserStatus,
    /// The store sent a confirmation email instead of signing the user in.
    pub confirmation_required: bool,
}

#[derive(Serialize)]
struct NewProfile<'a> {
    id: &'a str,
    email: &'a str,
    full_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    role: UserRole,
    status: UserStatus,
}

/// Loads the `users` row behind an authenticated identity.
pub(crate) async fn load_profile(
    rest: &RestClient,
    access_token: &str,
    user_id: &str,
) -> Result<Option<User>, RestError> {
    let query = SelectQuery::new(User::LIST.select).filter(Filter::eq("id", user_id));
    rest.select_first(access_token, User::LIST.table, &query)
        .await
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> Result<Response, ServiceError> {
    let email = body.email.trim();
    LoginForm {
        email,
        password: &body.password,
    }
    .validate()?;

    let auth_session = match state.auth().sign_in_with_password(email, &body.password).await {
        Ok(session) => session,
        Err(err) => {
            let result = if err.is_rejected_credentials() {
                "rejected"
            } else {
                "error"
            };
            counter!("admin_login_total", "result" => result).increment(1);
            return Err(err.into());
        }
    };

    let rest = state.rest();
    let access_token = auth_session.access_token.as_str();
    let user_id = auth_session.user.id.as_str();
    let profile = with_timeout(
        state.store_timeout(),
        retry_with_backoff(state.retry(), move || {
            load_profile(rest, access_token, user_id)
        }),
    )
    .await;

    let user = match profile {
        Ok(Some(user)) if user.is_active_admin() => user,
        Ok(profile) => {
            counter!("admin_login_total", "result" => "forbidden").increment(1);
            info!(
                stage = "auth",
                %user_id,
                role = ?profile.as_ref().map(|user| user.role),
                status = ?profile.as_ref().map(|user| user.status),
                "login refused: not an active admin"
            );
            sign_out_quietly(&state, access_token).await;
            return Err(ServiceError::Forbidden("admin access required"));
        }
        Err(err) => {
            counter!("admin_login_total", "result" => "error").increment(1);
            sign_out_quietly(&state, access_token).await;
            return Err(err.into());
        }
    };

    let token = generate_token();
    let token_hash = hash_token(&token);
    let now = state.now();
    let expires_at = now + state.session().ttl;
    let stored = state
        .storage()
        .sessions()
        .insert(&NewSession {
            token_hash: &token_hash,
            user_id: &user.id,
            email: auth_session.user.email.as_deref().unwrap_or(&user.email),
            access_token,
            refresh_token: &auth_session.refresh_token,
            access_expires_at: auth_session.expires_at(now),
            created_at: now,
            expires_at,
        })
        .await;
    if let Err(err) = stored {
        counter!("admin_login_total", "result" => "error").increment(1);
        sign_out_quietly(&state, access_token).await;
        return Err(err.into());
    }

    counter!("admin_login_total", "result" => "success").increment(1);
    info!(stage = "auth", user_id = %user.id, "admin signed in");

    let cookie = session_cookie(&token, state.session());
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionView { user, expires_at }),
    )
        .into_response())
}

/// Creates an account and an admin profile awaiting activation by an
/// existing operator.
pub async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<RegistrationView>), ServiceError> {
    let email = body.email.trim();
    let full_name = body.full_name.trim();
    let phone = body
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    RegistrationForm {
        email,
        password: &body.password,
        confirm_password: &body.confirm_password,
        full_name,
        phone,
    }
    .validate()?;

    let outcome = state
        .auth()
        .sign_up(email, &body.password, full_name)
        .await?;
    let user_id = outcome.user().id.clone();
    let token = match &outcome {
        SignUpOutcome::Session(session) => session.access_token.as_str(),
        SignUpOutcome::Pending(_) => state.rest().api_key(),
    };

    let profile = NewProfile {
        id: &user_id,
        email,
        full_name,
        phone,
        role: UserRole::Admin,
        status: UserStatus::Pending,
    };
    let inserted: Result<User, RestError> = state
        .rest()
        .insert(token, User::LIST.table, &profile, User::LIST.select)
        .await;
    match inserted {
        Ok(_) => {}
        Err(err) if err.is_unique_violation() => {
            debug!(stage = "auth", %user_id, "profile row already provisioned");
        }
        Err(err) => return Err(err.into()),
    }

    if let SignUpOutcome::Session(session) = &outcome {
        sign_out_quietly(&state, &session.access_token).await;
    }
    info!(stage = "auth", %user_id, "admin registration pending activation");

    Ok((
        StatusCode::CREATED,
        Json(RegistrationView {
            user_id,
            email: email.to_string(),
            status: UserStatus::Pending,
            confirmation_required: matches!(outcome, SignUpOutcome::Pending(_)),
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    if let Some(token) = session_token(&headers) {
        let token_hash = hash_token(token);
        let sessions = state.storage().sessions();
        if let Some(session) = sessions.fetch_active(&token_hash, state.now()).await? {
            sign_out_quietly(&state, &session.access_token).await;
            info!(stage = "auth", user_id = %session.user_id, "admin signed out");
        }
        sessions.delete(&token_hash).await?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_cookie(state.session()))],
    )
        .into_response())
}

pub async fn me(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<SessionView>, ServiceError> {
    let user = state
        .rest()
        .select_by_id(
            &admin.access_token,
            User::LIST.table,
            &admin.user_id,
            User::LIST.select,
        )
        .await?;
    Ok(Json(SessionView {
        user,
        expires_at: admin.expires_at,
    }))
}

async fn sign_out_quietly(state: &AppState, access_token: &str) {
    if let Err(err) = state.auth().sign_out(access_token).await {
        warn!(stage = "auth", error = %err, "store sign-out failed");
    }
}
