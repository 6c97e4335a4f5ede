use std::time::Instant;

use metrics::{counter, histogram};
use reqwest::{header::HeaderMap, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::query::{Filter, SelectQuery};
use crate::retry::{Retryable, TimedOut};

const PREFER_COUNT: &str = "count=exact";
const PREFER_RETURN: &str = "return=representation";
const UNIQUE_VIOLATION: &str = "23505";

/// Client for the table query API of the remote data store.
///
/// Every call is made on behalf of an operator: the access token is sent as
/// the bearer so row level security applies to the operator's role.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl RestClient {
    /// Creates a client rooted at `base_url` (for example `https://host/rest/v1/`).
    pub fn new(base_url: Url, api_key: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Project key, usable as the bearer for anonymous reads.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Fetches one page of rows together with the exact total row count.
    ///
    /// An offset past the last row is not an error: the page comes back
    /// empty with the total still filled in.
    pub async fn select_page<T>(
        &self,
        access_token: &str,
        table: &str,
        query: &SelectQuery,
    ) -> Result<RowsPage<T>, RestError>
    where
        T: DeserializeOwned,
    {
        let url = self.table_url(table, &query.to_query_pairs())?;
        let request = self
            .authorized_request(Method::GET, url, access_token)
            .header("Prefer", PREFER_COUNT);
        let response = self.send(table, "select", request).await?;

        let status = response.status();
        let total = content_range_total(response.headers());
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(stage = "store", %table, ?total, "requested range past end of table");
            return Ok(RowsPage {
                rows: Vec::new(),
                total,
            });
        }

        let rows = parse_json::<Vec<T>>(response).await?;
        Ok(RowsPage { rows, total })
    }

    /// Returns the first row matching `query`, if any.
    pub async fn select_first<T>(
        &self,
        access_token: &str,
        table: &str,
        query: &SelectQuery,
    ) -> Result<Option<T>, RestError>
    where
        T: DeserializeOwned,
    {
        let query = query.clone().limit(1);
        let url = self.table_url(table, &query.to_query_pairs())?;
        let request = self.authorized_request(Method::GET, url, access_token);
        let response = self.send(table, "select", request).await?;
        let rows = parse_json::<Vec<T>>(response).await?;
        Ok(rows.into_iter().next())
    }

    /// Fetches a row by primary key.
    pub async fn select_by_id<T>(
        &self,
        access_token: &str,
        table: &str,
        id: &str,
        select: &str,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
    {
        let query = SelectQuery::new(select).filter(Filter::eq("id", id));
        self.select_first(access_token, table, &query)
            .await?
            .ok_or_else(|| RestError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    /// Counts rows matching `filters` without transferring them.
    pub async fn count(
        &self,
        access_token: &str,
        table: &str,
        filters: &[Filter],
    ) -> Result<u64, RestError> {
        let mut pairs = vec![
            ("select".to_string(), "id".to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        pairs.extend(filters.iter().map(Filter::to_query_pair));
        let url = self.table_url(table, &pairs)?;
        let request = self
            .authorized_request(Method::HEAD, url, access_token)
            .header("Prefer", PREFER_COUNT);
        let response = self.send(table, "count", request).await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(error_from_response(response).await);
        }

        content_range_total(response.headers()).ok_or(RestError::MissingCount)
    }

    /// Applies `patch` to the row with the given id and returns the updated row.
    pub async fn update_by_id<T, P>(
        &self,
        access_token: &str,
        table: &str,
        id: &str,
        patch: &P,
        select: &str,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let pairs = SelectQuery::new(select)
            .filter(Filter::eq("id", id))
            .to_query_pairs();
        let url = self.table_url(table, &pairs)?;
        let request = self
            .authorized_request(Method::PATCH, url, access_token)
            .header("Prefer", PREFER_RETURN)
            .json(patch);
        let response = self.send(table, "update", request).await?;
        let rows = parse_json::<Vec<T>>(response).await?;
        rows.into_iter().next().ok_or_else(|| RestError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })
    }

    /// Deletes the row with the given id.
    pub async fn delete_by_id(
        &self,
        access_token: &str,
        table: &str,
        id: &str,
    ) -> Result<(), RestError> {
        let pairs = SelectQuery::new("id")
            .filter(Filter::eq("id", id))
            .to_query_pairs();
        let url = self.table_url(table, &pairs)?;
        let request = self
            .authorized_request(Method::DELETE, url, access_token)
            .header("Prefer", PREFER_RETURN);
        let response = self.send(table, "delete", request).await?;
        let rows = parse_json::<Vec<serde_json::Value>>(response).await?;
        if rows.is_empty() {
            return Err(RestError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Inserts a row and returns it as stored.
    pub async fn insert<T, R>(
        &self,
        access_token: &str,
        table: &str,
        row: &R,
        select: &str,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        R: Serialize + ?Sized,
    {
        let url = self.table_url(table, &[("select".to_string(), select.to_string())])?;
        let request = self
            .authorized_request(Method::POST, url, access_token)
            .header("Prefer", PREFER_RETURN)
            .json(row);
        let response = self.send(table, "insert", request).await?;
        let rows = parse_json::<Vec<T>>(response).await?;
        rows.into_iter().next().ok_or_else(|| RestError::EmptyInsert {
            table: table.to_string(),
        })
    }

    fn table_url(&self, table: &str, pairs: &[(String, String)]) -> Result<Url, RestError> {
        let mut url = self.base_url.join(table)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorized_request(&self, method: Method, url: Url, access_token: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {access_token}"))
    }

    async fn send(
        &self,
        table: &str,
        op: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, RestError> {
        let start = Instant::now();
        let result = request.send().await;
        histogram!("store_request_seconds", "table" => table.to_string(), "op" => op)
            .record(start.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(response) if response.status().is_success() => "ok",
            Ok(response) if response.status() == StatusCode::RANGE_NOT_SATISFIABLE => "ok",
            Ok(_) => "error",
            Err(_) => "transport_error",
        };
        counter!(
            "store_requests_total",
            "table" => table.to_string(),
            "op" => op,
            "result" => outcome
        )
        .increment(1);

        result.map_err(|err| {
            warn!(stage = "store", %table, op, error = %err, "store request failed");
            RestError::Http(err)
        })
    }
}

/// Rows returned by [`RestClient::select_page`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowsPage<T> {
    pub rows: Vec<T>,
    /// Exact count of rows matching the filters, when the store reported it.
    pub total: Option<u64>,
}

/// Error body returned by the query API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

/// Errors produced by the query client.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{table} row {id} not found")]
    NotFound { table: String, id: String },
    #[error("insert into {table} returned no rows")]
    EmptyInsert { table: String },
    #[error("store response did not include a row count")]
    MissingCount,
    #[error("store call {0}")]
    Timeout(TimedOut),
    #[error("store rejected request with {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        code: Option<String>,
        details: Option<String>,
        hint: Option<String>,
    },
}

impl RestError {
    /// HTTP status that best describes the failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::Timeout(_) => Some(StatusCode::GATEWAY_TIMEOUT),
            Self::Api { status, code, .. } => {
                if code.as_deref() == Some(UNIQUE_VIOLATION) {
                    Some(StatusCode::CONFLICT)
                } else {
                    Some(*status)
                }
            }
            Self::Http(err) => err.status(),
            Self::Url(_) | Self::EmptyInsert { .. } | Self::MissingCount => None,
        }
    }

    /// Store-specific error code, when one was returned.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }
}

impl Retryable for RestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Timeout(_) => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

impl From<TimedOut> for RestError {
    fn from(value: TimedOut) -> Self {
        Self::Timeout(value)
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500..=599)
}

/// Reads the total from `Content-Range: 0-9/42` or `*/42`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get("content-range")?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

async fn error_from_response(response: Response) -> RestError {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"));
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
    RestError::Api {
        status,
        message: body.message.unwrap_or(text),
        code: body.code,
        details: body.details,
        hint: body.hint,
    }
}

async fn parse_json<T>(response: Response) -> Result<T, RestError>
where
    T: DeserializeOwned,
{
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    Ok(response.json().await?)
}
