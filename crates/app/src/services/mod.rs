//! Data access on behalf of a signed-in operator.
//!
//! Every entity shares the same sequences (list, get, status change, delete
//! and stats); they are written once over the [`Record`] traits and
//! instantiated per table.

pub mod dashboard;
pub mod legal;

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use market_admin_core::{
    entities::{EntityStatus, Record, StatusRecord},
    query::ExtraFilter,
    ListParams, ListQuery, ListSpec, Page, SortOrder, ValidationErrors,
};
use market_admin_postgrest::{
    retry_with_backoff, Filter, Op, Order, RestClient, RestError, RetryConfig, SelectQuery,
};

use crate::error::ServiceError;

/// Store client bound to one operator's access token.
#[derive(Clone, Copy)]
pub struct StoreScope<'a> {
    rest: &'a RestClient,
    token: &'a str,
}

impl<'a> StoreScope<'a> {
    pub fn new(rest: &'a RestClient, token: &'a str) -> Self {
        Self { rest, token }
    }

    pub fn rest(&self) -> &'a RestClient {
        self.rest
    }

    pub fn token(&self) -> &'a str {
        self.token
    }
}

/// A page of rows together with the list state that produced it.
#[derive(Debug, Serialize)]
pub struct ListView<T> {
    #[serde(flatten)]
    pub page: Page<T>,
    pub query: ListQuery,
}

/// Row counts of one table, overall and per status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStats {
    pub total: u64,
    pub by_status: BTreeMap<&'static str, u64>,
}

impl StatusStats {
    pub fn of<S: EntityStatus>(&self, status: S) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Serialize)]
struct StatusPatch {
    status: &'static str,
    updated_at: DateTime<Utc>,
}

/// Translates list state into a store read.
pub fn select_query(spec: &ListSpec, query: &ListQuery) -> SelectQuery {
    let filters = &query.filters;
    let mut select = SelectQuery::new(spec.select)
        .filter_opt(
            filters
                .status
                .as_deref()
                .map(|status| Filter::eq("status", status)),
        )
        .filter_opt(
            spec.category_column
                .zip(filters.category.as_deref())
                .map(|(column, category)| Filter::eq(column, category)),
        );

    for (column, value) in &filters.extra {
        select = select.filter(Filter::eq(*column, value.as_str()));
    }

    select = select
        .filter_opt(
            filters
                .search
                .as_deref()
                .and_then(|term| Filter::search(spec.searchable, term)),
        )
        .filter_opt(
            filters
                .date_from
                .map(|from| Filter::compare(spec.date_column, Op::Gte, timestamp(from))),
        )
        .filter_opt(filters.date_to.map(|to| {
            let op = if to.inclusive { Op::Lte } else { Op::Lt };
            Filter::compare(spec.date_column, op, timestamp(to.at))
        }));

    let order = match query.sort_order {
        SortOrder::Asc => Order::asc(query.sort_by),
        SortOrder::Desc => Order::desc(query.sort_by),
    };
    select
        .order(order)
        .range(query.offset(), u64::from(query.limit()))
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lists one page of `R`. A page past the end comes back empty with the
/// real total so the caller can step back.
pub async fn list<R: Record>(
    scope: StoreScope<'_>,
    params: &ListParams,
    extras: &[ExtraFilter],
) -> Result<ListView<R>, ServiceError> {
    let spec = R::LIST;
    let query = ListQuery::normalize(params, &spec, extras)?;
    let rows = scope
        .rest
        .select_page::<R>(scope.token, spec.table, &select_query(&spec, &query))
        .await?;
    let total = rows.total.ok_or(RestError::MissingCount)?;
    let page = Page::new(rows.rows, &query, total);
    if page.meta.is_past_end() {
        debug!(
            stage = "store",
            table = spec.table,
            page = query.page,
            total_pages = page.meta.total_pages,
            "requested page past the end"
        );
    }
    Ok(ListView { page, query })
}

pub async fn get<R: Record>(scope: StoreScope<'_>, id: &str) -> Result<R, ServiceError> {
    let spec = R::LIST;
    Ok(scope
        .rest
        .select_by_id(scope.token, spec.table, id, spec.select)
        .await?)
}

/// Parses a status name for `R`, reporting unknown values as a field error.
pub fn parse_status<R: StatusRecord>(raw: &str) -> Result<R::Status, ServiceError> {
    let raw = raw.trim();
    <R::Status as EntityStatus>::parse(raw).ok_or_else(|| {
        let mut errors = ValidationErrors::default();
        errors.insert("status", format!("unknown status '{raw}'"));
        ServiceError::Validation(errors)
    })
}

pub async fn update_status<R: StatusRecord>(
    scope: StoreScope<'_>,
    id: &str,
    status: R::Status,
    now: DateTime<Utc>,
) -> Result<R, ServiceError> {
    let spec = R::LIST;
    let patch = StatusPatch {
        status: status.as_str(),
        updated_at: now,
    };
    let row: R = scope
        .rest
        .update_by_id(scope.token, spec.table, id, &patch, spec.select)
        .await?;
    info!(
        stage = "store",
        table = spec.table,
        %id,
        status = status.as_str(),
        "status updated"
    );
    Ok(row)
}

pub async fn delete<R: Record>(scope: StoreScope<'_>, id: &str) -> Result<(), ServiceError> {
    let table = R::LIST.table;
    scope.rest.delete_by_id(scope.token, table, id).await?;
    info!(stage = "store", %table, %id, "row deleted");
    Ok(())
}

/// Counts rows of `R` overall and for every status, one query each.
pub async fn stats<R: StatusRecord>(scope: StoreScope<'_>) -> Result<StatusStats, ServiceError> {
    Ok(status_stats::<R>(scope, None).await?)
}

pub(crate) async fn status_stats<R: StatusRecord>(
    scope: StoreScope<'_>,
    retry: Option<&RetryConfig>,
) -> Result<StatusStats, RestError> {
    let table = R::LIST.table;
    let total = count(scope, retry, table, &[]).await?;
    let mut by_status = BTreeMap::new();
    for status in <R::Status as EntityStatus>::all() {
        let name = status.as_str();
        let filters = [Filter::eq("status", name)];
        by_status.insert(name, count(scope, retry, table, &filters).await?);
    }
    Ok(StatusStats { total, by_status })
}

pub(crate) async fn count(
    scope: StoreScope<'_>,
    retry: Option<&RetryConfig>,
    table: &str,
    filters: &[Filter],
) -> Result<u64, RestError> {
    match retry {
        Some(config) => {
            retry_with_backoff(config, move || {
                scope.rest.count(scope.token, table, filters)
            })
            .await
        }
        None => scope.rest.count(scope.token, table, filters).await,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use httpmock::MockServer;
    use market_admin_postgrest::RestClient;
    use url::Url;

    pub fn rest_client(server: &MockServer) -> RestClient {
        let base = Url::parse(&server.url("/rest/v1/")).expect("base url");
        RestClient::new(base, "anon-key", reqwest::Client::new())
    }
}
