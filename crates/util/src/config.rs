use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://market-admin.db?mode=rwc";
const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 8_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Location and credentials of the remote data store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Project root, always ending with `/`.
    pub url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl StoreConfig {
    /// Base URL of the table query API.
    pub fn rest_url(&self) -> Result<Url, url::ParseError> {
        self.url.join("rest/v1/")
    }

    /// Base URL of the authentication API.
    pub fn auth_url(&self) -> Result<Url, url::ParseError> {
        self.url.join("auth/v1/")
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub store: StoreConfig,
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    pub cookie_secure: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let store_url = required("STORE_URL")?;
        let store_url = parse_store_url(&store_url)?;
        let api_key = required("STORE_API_KEY")?;
        let timeout = Duration::from_millis(parse_positive("STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?);

        let session_ttl =
            Duration::from_secs(parse_positive("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?);
        let session_sweep_interval = Duration::from_secs(parse_positive(
            "SESSION_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);

        let cookie_secure = match env::var("COOKIE_SECURE") {
            Ok(value) => parse_bool("COOKIE_SECURE", &value)?,
            Err(_) => matches!(environment, Environment::Production),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            store: StoreConfig {
                url: store_url,
                api_key,
                timeout,
            },
            session_ttl,
            session_sweep_interval,
            cookie_secure,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Reads a duration setting; zero is rejected.
fn parse_positive(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(parsed) if parsed > 0 => Ok(parsed),
            _ => Err(ConfigError::InvalidNumber { name, value }),
        },
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidBool {
            name,
            value: other.to_string(),
        }),
    }
}

fn parse_store_url(raw: &str) -> Result<Url, ConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(ConfigError::StoreUrl)
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    StoreUrl(url::ParseError),
    InvalidNumber { name: &'static str, value: String },
    InvalidBool { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::StoreUrl(err) => write!(f, "invalid STORE_URL value: {err}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::InvalidBool { name, value } => {
                write!(f, "{name} must be true or false (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
