//! Back-office HTTP handlers.
//!
//! Handlers are generic over the record type and instantiated per table in
//! [`routes`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::Deserialize;
use tracing::info;

use market_admin_core::{
    entities::{
        Business, Company, LegalPage, Record, Service, StatusRecord, Transaction, User,
        UserStatus,
    },
    query::{ExtraFilter, BUSINESS_FILTER, ROLE_FILTER},
    ListParams,
};

use crate::{
    error::ServiceError,
    extract::{JsonBody, Params},
    router::AppState,
    services::{
        self,
        dashboard::{self, DashboardStats},
        legal::{self, LegalPageInput},
        ListView, StatusStats, StoreScope,
    },
    session::AdminContext,
};

/// Per-table list options exposed to operators.
pub trait Listing: Record {
    const FILTERS: &'static [ExtraFilter] = &[];
}

impl Listing for User {
    const FILTERS: &'static [ExtraFilter] = &[ROLE_FILTER];
}

impl Listing for Service {
    const FILTERS: &'static [ExtraFilter] = &[BUSINESS_FILTER];
}

impl Listing for Company {}
impl Listing for Business {}
impl Listing for Transaction {}
impl Listing for LegalPage {}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/dashboard", get(dashboard_stats))
        .route("/admin/users", get(list_records::<User>))
        .route("/admin/users/stats", get(record_stats::<User>))
        .route(
            "/admin/users/:id",
            get(get_record::<User>).delete(delete_user),
        )
        .route(
            "/admin/users/:id/status",
            patch(update_user_status),
        )
        .route("/admin/companies", get(list_records::<Company>))
        .route("/admin/companies/stats", get(record_stats::<Company>))
        .route(
            "/admin/companies/:id",
            get(get_record::<Company>).delete(delete_record::<Company>),
        )
        .route(
            "/admin/companies/:id/status",
            patch(update_status::<Company>),
        )
        .route("/admin/businesses", get(list_records::<Business>))
        .route("/admin/businesses/stats", get(record_stats::<Business>))
        .route(
            "/admin/businesses/:id",
            get(get_record::<Business>).delete(delete_record::<Business>),
        )
        .route(
            "/admin/businesses/:id/status",
            patch(update_status::<Business>),
        )
        .route("/admin/services", get(list_records::<Service>))
        .route("/admin/services/stats", get(record_stats::<Service>))
        .route(
            "/admin/services/:id",
            get(get_record::<Service>).delete(delete_record::<Service>),
        )
        .route(
            "/admin/services/:id/status",
            patch(update_status::<Service>),
        )
        .route("/admin/transactions", get(list_records::<Transaction>))
        .route(
            "/admin/transactions/stats",
            get(record_stats::<Transaction>),
        )
        .route("/admin/transactions/:id", get(get_record::<Transaction>))
        .route(
            "/admin/transactions/:id/status",
            patch(update_status::<Transaction>),
        )
        .route(
            "/admin/legal-pages",
            get(list_records::<LegalPage>).post(create_legal_page),
        )
        .route(
            "/admin/legal-pages/:id",
            get(get_record::<LegalPage>)
                .put(update_legal_page)
                .delete(delete_record::<LegalPage>),
        )
}

fn scope<'a>(state: &'a AppState, admin: &'a AdminContext) -> StoreScope<'a> {
    StoreScope::new(state.rest(), &admin.access_token)
}

async fn dashboard_stats(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<DashboardStats>, ServiceError> {
    let stats = dashboard::load(
        scope(&state, &admin),
        state.retry(),
        state.store_timeout(),
    )
    .await?;
    Ok(Json(stats))
}

async fn list_records<R: Listing>(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Params(params): Params<ListParams>,
) -> Result<Json<ListView<R>>, ServiceError> {
    let view = services::list::<R>(scope(&state, &admin), &params, R::FILTERS).await?;
    Ok(Json(view))
}

async fn get_record<R: Record>(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
) -> Result<Json<R>, ServiceError> {
    Ok(Json(services::get::<R>(scope(&state, &admin), &id).await?))
}

async fn record_stats<R: StatusRecord>(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<StatusStats>, ServiceError> {
    Ok(Json(services::stats::<R>(scope(&state, &admin)).await?))
}

async fn update_status<R: StatusRecord>(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
    JsonBody(change): JsonBody<StatusChange>,
) -> Result<Json<R>, ServiceError> {
    let status = services::parse_status::<R>(&change.status)?;
    let row =
        services::update_status::<R>(scope(&state, &admin), &id, status, state.now()).await?;
    Ok(Json(row))
}

async fn delete_record<R: Record>(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    services::delete::<R>(scope(&state, &admin), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Status change for user accounts. Operators cannot change their own
/// account, and leaving `active` ends the target's back-office sessions.
async fn update_user_status(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
    JsonBody(change): JsonBody<StatusChange>,
) -> Result<Json<User>, ServiceError> {
    let status = services::parse_status::<User>(&change.status)?;
    if id == admin.user_id {
        return Err(ServiceError::Forbidden(
            "operators cannot change the status of their own account",
        ));
    }

    let user =
        services::update_status::<User>(scope(&state, &admin), &id, status, state.now()).await?;
    if status != UserStatus::Active {
        revoke_sessions(&state, &id).await?;
    }
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    if id == admin.user_id {
        return Err(ServiceError::Forbidden(
            "operators cannot delete their own account",
        ));
    }
    services::delete::<User>(scope(&state, &admin), &id).await?;
    revoke_sessions(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_sessions(state: &AppState, user_id: &str) -> Result<(), ServiceError> {
    let revoked = state.storage().sessions().delete_for_user(user_id).await?;
    if revoked > 0 {
        info!(stage = "session", %user_id, revoked, "sessions revoked");
    }
    Ok(())
}

async fn create_legal_page(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    JsonBody(input): JsonBody<LegalPageInput>,
) -> Result<(StatusCode, Json<LegalPage>), ServiceError> {
    let page = legal::create(scope(&state, &admin), &input, state.now()).await?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn update_legal_page(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<LegalPageInput>,
) -> Result<Json<LegalPage>, ServiceError> {
    let page = legal::update(scope(&state, &admin), &id, &input, state.now()).await?;
    Ok(Json(page))
}

/// Public legal page lookup; no session required.
pub async fn public_legal_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<LegalPage>, ServiceError> {
    Ok(Json(legal::by_slug(state.rest(), &slug).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
    };
    use chrono::Duration;
    use http_body_util::BodyExt;
    use httpmock::{
        Method::{DELETE, PATCH},
        MockServer,
    };
    use market_admin_storage::NewSession;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::router::{app_router, test_support::state};
    use crate::session::{generate_token, hash_token};

    struct Harness {
        _dir: tempfile::TempDir,
        server: MockServer,
        state: AppState,
        cookie: String,
    }

    async fn signed_in() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let state = state(&dir, &server).await;
        let token = generate_token();
        let now = state.now();
        for (hash, user_id) in [(hash_token(&token), "admin-1"), (hash_token("other"), "user-7")] {
            state
                .storage()
                .sessions()
                .insert(&NewSession {
                    token_hash: &hash,
                    user_id,
                    email: "ops@example.com",
                    access_token: "access-1",
                    refresh_token: "refresh-1",
                    access_expires_at: now + Duration::hours(1),
                    created_at: now,
                    expires_at: now + Duration::hours(12),
                })
                .await
                .expect("insert session");
        }
        Harness {
            _dir: dir,
            server,
            state,
            cookie: format!("admin_session={token}"),
        }
    }

    impl Harness {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::COOKIE, &self.cookie);
            let body = match body {
                Some(value) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            let response = app_router(self.state.clone())
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn business(id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Cut & Co",
            "owner_id": "user-7",
            "category_id": "cat-1",
            "status": status,
            "owner": { "id": "user-7", "full_name": "Sam", "email": "sam@example.com" },
            "category": { "id": "cat-1", "name": "Hair" },
            "created_at": "2024-02-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn lists_businesses_with_filters_and_page_meta() {
        let harness = signed_in().await;
        let mock = harness.server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/businesses")
                .query_param("status", "eq.pending")
                .query_param("category_id", "eq.cat-1")
                .query_param("order", "name.asc")
                .query_param("offset", "5")
                .query_param("limit", "5")
                .header("Authorization", "Bearer access-1");
            then.status(206)
                .header("Content-Range", "5-5/6")
                .json_body(json!([business("biz-6", "pending")]));
        });

        let (status, body) = harness
            .send(
                "GET",
                "/admin/businesses?page=2&pageSize=5&status=pending&category=cat-1&sortBy=name&sortOrder=asc",
                None,
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        mock.assert();
        assert_eq!(body["items"][0]["id"], "biz-6");
        assert_eq!(body["total"], 6);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["hasPrev"], true);
        assert_eq!(body["hasNext"], false);
        assert_eq!(body["query"]["sortBy"], "name");
    }

    #[tokio::test]
    async fn invalid_status_filter_is_rejected_before_the_store() {
        let harness = signed_in().await;
        let mock = harness.server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/rest/v1/services");
            then.status(200).json_body(json!([]));
        });

        let (status, body) = harness
            .send("GET", "/admin/services?status=archived", None)
            .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["status"].is_string());
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn out_of_range_paging_values_are_clamped() {
        let harness = signed_in().await;
        let company = json!({
            "id": "co-1",
            "name": "Acme",
            "owner_id": "user-7",
            "status": "active",
            "created_at": "2024-01-01T00:00:00Z"
        });
        let single = harness.server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/companies")
                .query_param("offset", "0")
                .query_param("limit", "1");
            then.status(206)
                .header("Content-Range", "0-0/3")
                .json_body(json!([company.clone()]));
        });
        let default_size = harness.server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/companies")
                .query_param("offset", "0")
                .query_param("limit", "10");
            then.status(200)
                .header("Content-Range", "0-0/1")
                .json_body(json!([company.clone()]));
        });

        let (status, body) = harness
            .send("GET", "/admin/companies?page=-1&pageSize=-5", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["pageSize"], 1);
        single.assert();

        let (status, body) = harness
            .send("GET", "/admin/companies?page=&pageSize=", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["pageSize"], 10);
        default_size.assert();
    }

    #[tokio::test]
    async fn malformed_input_renders_problem_documents() {
        let harness = signed_in().await;
        let store = harness.server.mock(|when, then| {
            when.path_contains("/rest/v1/");
            then.status(200).json_body(json!([]));
        });

        let response = app_router(harness.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/admin/companies?page=two")
                    .header(header::COOKIE, &harness.cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["type"], "malformed_request");
        assert!(body["detail"].as_str().unwrap().contains("expected an integer"));

        let (status, body) = harness
            .send(
                "PATCH",
                "/admin/businesses/biz-1/status",
                Some(json!({ "state": "active" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "malformed_request");
        store.assert_hits(0);
    }

    #[tokio::test]
    async fn approves_a_business() {
        let harness = signed_in().await;
        let mock = harness.server.mock(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/businesses")
                .query_param("id", "eq.biz-1")
                .header("Prefer", "return=representation")
                .json_body_partial(r#"{"status":"active"}"#);
            then.status(200).json_body(json!([business("biz-1", "active")]));
        });

        let (status, body) = harness
            .send(
                "PATCH",
                "/admin/businesses/biz-1/status",
                Some(json!({ "status": "active" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        mock.assert();
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn suspending_a_user_revokes_their_sessions() {
        let harness = signed_in().await;
        harness.server.mock(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/users")
                .query_param("id", "eq.user-7");
            then.status(200).json_body(json!([{
                "id": "user-7",
                "email": "sam@example.com",
                "role": "admin",
                "status": "suspended",
                "created_at": "2024-01-01T00:00:00Z"
            }]));
        });

        let (status, _) = harness
            .send(
                "PATCH",
                "/admin/users/user-7/status",
                Some(json!({ "status": "suspended" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert!(!harness
            .state
            .storage()
            .sessions()
            .delete(&hash_token("other"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn operators_cannot_suspend_or_delete_themselves() {
        let harness = signed_in().await;
        let (status, _) = harness
            .send(
                "PATCH",
                "/admin/users/admin-1/status",
                Some(json!({ "status": "suspended" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = harness.send("DELETE", "/admin/users/admin-1", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn deleting_missing_row_is_not_found() {
        let harness = signed_in().await;
        harness.server.mock(|when, then| {
            when.method(DELETE)
                .path("/rest/v1/services")
                .query_param("id", "eq.svc-404");
            then.status(200).json_body(json!([]));
        });

        let (status, body) = harness
            .send("DELETE", "/admin/services/svc-404", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "not_found");
    }

    #[tokio::test]
    async fn transactions_cannot_be_deleted() {
        let harness = signed_in().await;
        let (status, _) = harness
            .send("DELETE", "/admin/transactions/tx-1", None)
            .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn creates_legal_page_with_generated_slug() {
        let harness = signed_in().await;
        let lookup = harness.server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/legal_pages")
                .query_param("slug", "eq.privacy-policy");
            then.status(200).json_body(json!([]));
        });
        let insert = harness.server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/rest/v1/legal_pages")
                .json_body_partial(r#"{"slug":"privacy-policy"}"#);
            then.status(201).json_body(json!([{
                "id": "page-1",
                "title": "Privacy Policy",
                "slug": "privacy-policy",
                "content": "We keep little.",
                "created_at": "2024-01-01T00:00:00Z"
            }]));
        });

        let (status, body) = harness
            .send(
                "POST",
                "/admin/legal-pages",
                Some(json!({ "title": "Privacy Policy", "content": "We keep little." })),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        lookup.assert();
        insert.assert();
        assert_eq!(body["slug"], "privacy-policy");
    }

    #[tokio::test]
    async fn public_legal_page_needs_no_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/rest/v1/legal_pages")
                .query_param("slug", "eq.terms");
            then.status(200).json_body(json!([{
                "id": "page-2",
                "title": "Terms",
                "slug": "terms",
                "content": "Be nice.",
                "created_at": "2024-01-01T00:00:00Z"
            }]));
        });

        let response = app_router(state(&dir, &server).await)
            .oneshot(
                Request::builder()
                    .uri("/legal/terms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
