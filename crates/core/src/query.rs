use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::validation::ValidationErrors;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Static description of how an entity's table is listed.
#[derive(Debug, Clone, Copy)]
pub struct ListSpec {
    pub table: &'static str,
    /// Column list, including embedded relations.
    pub select: &'static str,
    pub sortable: &'static [&'static str],
    pub default_sort: &'static str,
    /// Columns matched by the free-text search.
    pub searchable: &'static [&'static str],
    /// Accepted `status` filter values; empty when the table has no status.
    pub statuses: &'static [&'static str],
    pub category_column: Option<&'static str>,
    pub date_column: &'static str,
}

/// Filters that apply to the `users` role column.
pub const ROLE_FILTER: ExtraFilter = ExtraFilter {
    param: "role",
    column: "role",
    allowed: Some(crate::entities::UserRole::NAMES),
};

/// Filters services by their owning business.
pub const BUSINESS_FILTER: ExtraFilter = ExtraFilter {
    param: "businessId",
    column: "business_id",
    allowed: None,
};

/// An entity-specific equality filter exposed as a query parameter.
#[derive(Debug, Clone, Copy)]
pub struct ExtraFilter {
    pub param: &'static str,
    pub column: &'static str,
    pub allowed: Option<&'static [&'static str]>,
}

/// Raw list parameters as submitted by the operator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default, deserialize_with = "lenient_int")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub page_size: Option<i64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
}

/// Reads a paging value: blank means absent, any integer is accepted and
/// clamped later by [`ListQuery::normalize`].
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected an integer, got '{value}'"))),
    }
}

impl ListParams {
    fn extra(&self, param: &str) -> Option<&str> {
        match param {
            "role" => self.role.as_deref(),
            "businessId" => self.business_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Upper end of a date range.
///
/// Date-only input covers the whole day, so it becomes an exclusive bound at
/// the following midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBound {
    pub at: DateTime<Utc>,
    pub inclusive: bool,
}

/// Filters shared by every list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateBound>,
    /// `(column, value)` pairs for entity-specific equality filters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(&'static str, String)>,
}

/// Normalized list state: page, page size, sort key and filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort_by: &'static str,
    pub sort_order: SortOrder,
    pub filters: ListFilters,
}

impl ListQuery {
    /// Returns the default state for a table: first page, default sort, no filters.
    pub fn first_page(spec: &ListSpec) -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: spec.default_sort,
            sort_order: SortOrder::Desc,
            filters: ListFilters::default(),
        }
    }

    /// Validates raw parameters against the table description.
    ///
    /// Out-of-range paging values are clamped and unknown sort columns fall
    /// back to the default; only filter values are rejected.
    pub fn normalize(
        params: &ListParams,
        spec: &ListSpec,
        extras: &[ExtraFilter],
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let defaults = Self::first_page(spec);

        let page = params
            .page
            .map_or(defaults.page, |page| u32::try_from(page.max(1)).unwrap_or(u32::MAX));
        let page_size = params.page_size.map_or(defaults.page_size, |size| {
            size.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32
        });

        let sort_by = params
            .sort_by
            .as_deref()
            .and_then(|value| spec.sortable.iter().copied().find(|col| *col == value))
            .unwrap_or(defaults.sort_by);
        let sort_order = params
            .sort_order
            .as_deref()
            .and_then(SortOrder::parse)
            .unwrap_or(defaults.sort_order);

        let status = non_blank(params.status.as_deref()).and_then(|value| {
            if value == "all" {
                None
            } else if spec.statuses.contains(&value) {
                Some(value.to_string())
            } else {
                errors.insert("status", format!("unknown status '{value}'"));
                None
            }
        });

        let category = match (spec.category_column, non_blank(params.category.as_deref())) {
            (Some(_), Some(value)) if value != "all" => Some(value.to_string()),
            _ => None,
        };

        let search = non_blank(params.search.as_deref()).map(str::to_string);

        let date_from = non_blank(params.date_from.as_deref()).and_then(|raw| {
            match parse_date(raw) {
                Some(ParsedDate::Day(day)) => Some(start_of_day(day)),
                Some(ParsedDate::Instant(at)) => Some(at),
                None => {
                    errors.insert("dateFrom", "expected YYYY-MM-DD or an RFC 3339 timestamp");
                    None
                }
            }
        });
        let date_to = non_blank(params.date_to.as_deref()).and_then(|raw| match parse_date(raw) {
            Some(ParsedDate::Day(day)) => Some(DateBound {
                at: start_of_day(day) + Duration::days(1),
                inclusive: false,
            }),
            Some(ParsedDate::Instant(at)) => Some(DateBound {
                at,
                inclusive: true,
            }),
            None => {
                errors.insert("dateTo", "expected YYYY-MM-DD or an RFC 3339 timestamp");
                None
            }
        });
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from >= to.at && !(to.inclusive && from == to.at) {
                errors.insert("dateTo", "end date must not precede start date");
            }
        }

        let mut extra = Vec::new();
        for filter in extras {
            let Some(value) = non_blank(params.extra(filter.param)) else {
                continue;
            };
            if value == "all" {
                continue;
            }
            match filter.allowed {
                Some(allowed) if !allowed.contains(&value) => {
                    errors.insert(filter.param, format!("unknown value '{value}'"));
                }
                _ => extra.push((filter.column, value.to_string())),
            }
        }

        errors.into_result()?;

        Ok(Self {
            page,
            page_size,
            sort_by,
            sort_order,
            filters: ListFilters {
                status,
                category,
                search,
                date_from,
                date_to,
                extra,
            },
        })
    }

    /// Zero-based index of the first row on the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// Zero-based index of the last row on the current page, inclusive.
    pub fn range_end(&self) -> u64 {
        self.offset() + u64::from(self.page_size) - 1
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }
}

/// Pagination summary returned with every list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn new(page: u32, page_size: u32, total: u64) -> Self {
        let page_size = page_size.max(1);
        let pages = total.div_ceil(u64::from(page_size)).max(1);
        let total_pages = u32::try_from(pages).unwrap_or(u32::MAX);
        Self {
            page,
            page_size,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Returns `true` when the requested page lies past the last page.
    pub fn is_past_end(&self) -> bool {
        self.page > self.total_pages
    }
}

/// One page of rows plus its pagination summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &ListQuery, total: u64) -> Self {
        Self {
            items,
            meta: PageMeta::new(query.page, query.page_size, total),
        }
    }
}

enum ParsedDate {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

fn parse_date(raw: &str) -> Option<ParsedDate> {
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(ParsedDate::Day(day));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| ParsedDate::Instant(at.with_timezone(&Utc)))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
