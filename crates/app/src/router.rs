use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use market_admin_postgrest::{AuthClient, RestClient, RetryConfig};
use market_admin_storage::Database;

use crate::session::{self, SessionSettings};
use crate::{admin, auth, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    rest: RestClient,
    auth: AuthClient,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    session: SessionSettings,
    retry: RetryConfig,
    store_timeout: Duration,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        rest: RestClient,
        auth: AuthClient,
        session: SessionSettings,
        store_timeout: Duration,
    ) -> Self {
        Self {
            metrics,
            storage,
            rest,
            auth,
            clock: Arc::new(Utc::now),
            session,
            retry: RetryConfig::default(),
            store_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn session(&self) -> &SessionSettings {
        &self.session
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

pub fn app_router(state: AppState) -> Router {
    let gated = admin::routes()
        .route("/auth/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_admin,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/legal/:slug", get(admin::public_legal_page))
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/logout", post(auth::logout))
        .merge(gated)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use httpmock::MockServer;
    use url::Url;

    /// Application state backed by a temp-file database and a mock store.
    pub async fn state(dir: &tempfile::TempDir, server: &MockServer) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let url = format!("sqlite://{}/admin.db?mode=rwc", dir.path().display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");

        let http = reqwest::Client::new();
        let rest = RestClient::new(
            Url::parse(&server.url("/rest/v1/")).expect("rest url"),
            "anon-key",
            http.clone(),
        );
        let auth = AuthClient::new(
            Url::parse(&server.url("/auth/v1/")).expect("auth url"),
            "anon-key",
            http,
        );

        AppState::new(
            metrics,
            database,
            rest,
            auth,
            SessionSettings {
                ttl: chrono::Duration::hours(12),
                cookie_secure: false,
            },
            Duration::from_secs(5),
        )
        .with_retry(RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::state;
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use httpmock::MockServer;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let app = app_router(state(&dir, &server).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let app = app_router(state(&dir, &server).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn admin_routes_require_a_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start();
        let app = app_router(state(&dir, &server).await);

        for uri in ["/admin/dashboard", "/admin/users", "/auth/me"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .expect("handler should respond");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(
                response.headers()[header::CONTENT_TYPE],
                "application/problem+json"
            );
        }
    }
}
