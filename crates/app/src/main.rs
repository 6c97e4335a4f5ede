mod admin;
mod auth;
mod error;
mod extract;
mod maintenance;
mod problem;
mod router;
mod services;
mod session;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use market_admin_postgrest::{AuthClient, RestClient};
use market_admin_storage::Database;
use market_admin_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", database_url = %config.database_url, "session database ready");

    let http = reqwest::Client::builder()
        .timeout(config.store.timeout)
        .user_agent(concat!("market-admin/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let rest = RestClient::new(config.store.rest_url()?, &config.store.api_key, http.clone());
    let auth = AuthClient::new(config.store.auth_url()?, &config.store.api_key, http);

    let session = session::SessionSettings {
        ttl: chrono::Duration::from_std(config.session_ttl)?,
        cookie_secure: config.cookie_secure,
    };
    let state = router::AppState::new(
        metrics,
        database.clone(),
        rest,
        auth,
        session,
        config.store.timeout,
    );

    maintenance::SessionSweeper::new(database, config.session_sweep_interval).spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        store = %config.store.url,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
