use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for operator sessions.
    pub fn sessions(&self) -> SessionRepository {
        SessionRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for signed-in operator sessions.
///
/// Only a hash of the cookie token is stored; the raw token never reaches
/// the database.
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Persists a new session.
    pub async fn insert(&self, session: &NewSession<'_>) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO admin_sessions \
             (token_hash, user_id, email, access_token, refresh_token, access_expires_at, created_at, expires_at, last_seen_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.token_hash)
        .bind(session.user_id)
        .bind(session.email)
        .bind(session.access_token)
        .bind(session.refresh_token)
        .bind(to_rfc3339(session.access_expires_at))
        .bind(to_rfc3339(session.created_at))
        .bind(to_rfc3339(session.expires_at))
        .bind(to_rfc3339(session.created_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if is_unique_violation(db_err.code().as_deref()) => {
                SessionError::DuplicateToken
            }
            other => SessionError::Database(other),
        })?;

        Ok(())
    }

    /// Loads a session that has not yet expired at `now`.
    pub async fn fetch_active(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AdminSession>, SessionError> {
        let row = sqlx::query_as::<_, AdminSession>(
            "SELECT token_hash, user_id, email, access_token, refresh_token, \
                    access_expires_at, created_at, expires_at, last_seen_at \
               FROM admin_sessions \
              WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(to_rfc3339(now))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Records activity on a session.
    pub async fn touch(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        sqlx::query("UPDATE admin_sessions SET last_seen_at = ? WHERE token_hash = ?")
            .bind(to_rfc3339(now))
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces the store tokens after a refresh.
    pub async fn update_tokens(
        &self,
        token_hash: &str,
        update: &SessionTokenUpdate<'_>,
    ) -> Result<(), SessionError> {
        let result = sqlx::query(
            "UPDATE admin_sessions \
                SET access_token = ?, refresh_token = ?, access_expires_at = ?, last_seen_at = ? \
              WHERE token_hash = ?",
        )
        .bind(update.access_token)
        .bind(update.refresh_token)
        .bind(to_rfc3339(update.access_expires_at))
        .bind(to_rfc3339(update.refreshed_at))
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound);
        }
        Ok(())
    }

    /// Removes a session, returning whether it existed.
    pub async fn delete(&self, token_hash: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes every session belonging to `user_id`.
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes up to `limit` sessions that expired at or before `now`.
    pub async fn delete_expired_batch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM admin_sessions \
              WHERE rowid IN (SELECT rowid FROM admin_sessions WHERE expires_at <= ? LIMIT ?)",
        )
        .bind(to_rfc3339(now))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Data required to create a session row.
pub struct NewSession<'a> {
    pub token_hash: &'a str,
    pub user_id: &'a str,
    pub email: &'a str,
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub access_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Fresh store tokens obtained through a refresh.
pub struct SessionTokenUpdate<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub access_expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

/// A persisted operator session.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AdminSession {
    pub token_hash: String,
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Errors that can occur while reading or writing sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token already exists")]
    DuplicateToken,
    #[error("session not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn is_unique_violation(code: Option<&str>) -> bool {
    // SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
    matches!(code, Some("1555") | Some("2067"))
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
