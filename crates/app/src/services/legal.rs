use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use market_admin_core::{
    entities::{LegalPage, Record},
    slug::{is_valid_slug, slugify},
    validation::LegalPageForm,
    ValidationErrors,
};
use market_admin_postgrest::{Filter, RestClient, RestError, SelectQuery};

use super::StoreScope;
use crate::error::ServiceError;

/// Legal page editor submission. A blank slug is derived from the title.
#[derive(Debug, Clone, Deserialize)]
pub struct LegalPageInput {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub content: String,
}

#[derive(Debug, PartialEq, Eq)]
struct Draft {
    title: String,
    slug: String,
    content: String,
}

impl Draft {
    fn resolve(input: &LegalPageInput) -> Result<Self, ValidationErrors> {
        let title = input.title.trim();
        let slug = match input.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slug.to_ascii_lowercase(),
            _ => slugify(title),
        };
        LegalPageForm {
            title,
            slug: &slug,
            content: &input.content,
        }
        .validate()?;

        Ok(Self {
            title: title.to_string(),
            slug,
            content: input.content.clone(),
        })
    }
}

#[derive(Serialize)]
struct LegalPageRow<'a> {
    title: &'a str,
    slug: &'a str,
    content: &'a str,
    updated_at: DateTime<Utc>,
}

impl<'a> LegalPageRow<'a> {
    fn new(draft: &'a Draft, now: DateTime<Utc>) -> Self {
        Self {
            title: &draft.title,
            slug: &draft.slug,
            content: &draft.content,
            updated_at: now,
        }
    }
}

pub async fn create(
    scope: StoreScope<'_>,
    input: &LegalPageInput,
    now: DateTime<Utc>,
) -> Result<LegalPage, ServiceError> {
    let draft = Draft::resolve(input)?;
    ensure_slug_free(scope, &draft.slug, None).await?;

    let spec = LegalPage::LIST;
    let page: LegalPage = scope
        .rest()
        .insert(scope.token(), spec.table, &LegalPageRow::new(&draft, now), spec.select)
        .await
        .map_err(|err| slug_conflict(err, &draft.slug))?;
    info!(stage = "store", id = %page.id, slug = %page.slug, "legal page created");
    Ok(page)
}

pub async fn update(
    scope: StoreScope<'_>,
    id: &str,
    input: &LegalPageInput,
    now: DateTime<Utc>,
) -> Result<LegalPage, ServiceError> {
    let draft = Draft::resolve(input)?;
    ensure_slug_free(scope, &draft.slug, Some(id)).await?;

    let spec = LegalPage::LIST;
    let page: LegalPage = scope
        .rest()
        .update_by_id(
            scope.token(),
            spec.table,
            id,
            &LegalPageRow::new(&draft, now),
            spec.select,
        )
        .await
        .map_err(|err| slug_conflict(err, &draft.slug))?;
    info!(stage = "store", %id, slug = %page.slug, "legal page updated");
    Ok(page)
}

/// Loads a page for public display using the anonymous key.
pub async fn by_slug(rest: &RestClient, slug: &str) -> Result<LegalPage, ServiceError> {
    let table = LegalPage::LIST.table;
    let not_found = || RestError::NotFound {
        table: table.to_string(),
        id: slug.to_string(),
    };
    if !is_valid_slug(slug) {
        return Err(not_found().into());
    }

    let query = SelectQuery::new(LegalPage::LIST.select).filter(Filter::eq("slug", slug));
    rest.select_first::<LegalPage>(rest.api_key(), table, &query)
        .await?
        .ok_or_else(|| not_found().into())
}

/// Fails when a page other than `except_id` already uses `slug`.
async fn ensure_slug_free(
    scope: StoreScope<'_>,
    slug: &str,
    except_id: Option<&str>,
) -> Result<(), ServiceError> {
    let query = SelectQuery::new("id")
        .filter(Filter::eq("slug", slug))
        .filter_opt(except_id.map(|id| Filter::neq("id", id)));
    let existing: Option<serde_json::Value> = scope
        .rest()
        .select_first(scope.token(), LegalPage::LIST.table, &query)
        .await?;
    match existing {
        Some(_) => Err(slug_taken(slug)),
        None => Ok(()),
    }
}

fn slug_taken(slug: &str) -> ServiceError {
    let mut errors = ValidationErrors::default();
    errors.insert("slug", format!("slug '{slug}' is already in use"));
    ServiceError::Conflict(errors)
}

/// A concurrent writer can claim the slug between the check and the write.
fn slug_conflict(err: RestError, slug: &str) -> ServiceError {
    if err.is_unique_violation() {
        slug_taken(slug)
    } else {
        err.into()
    }
}
