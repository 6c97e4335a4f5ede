use std::fmt::Write as _;

/// Comparison operators understood by the query API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gte,
    Lt,
    Lte,
    Ilike,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Ilike => "ilike",
        }
    }
}

/// A horizontal filter rendered into the request query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Compare {
        column: String,
        op: Op,
        value: String,
    },
    /// Matches when any of the inner filters matches.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: Op, value: impl Into<String>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(column, Op::Eq, value)
    }

    pub fn neq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(column, Op::Neq, value)
    }

    /// Case-insensitive substring match.
    pub fn contains(column: impl Into<String>, term: &str) -> Self {
        Self::compare(column, Op::Ilike, format!("*{term}*"))
    }

    /// Builds `or=(a.ilike.*term*,b.ilike.*term*)` over the given columns.
    ///
    /// Returns `None` when there is nothing to search.
    pub fn search(columns: &[&str], term: &str) -> Option<Self> {
        let term = term.trim();
        if term.is_empty() || columns.is_empty() {
            return None;
        }
        if let [column] = columns {
            return Some(Self::contains(*column, term));
        }
        Some(Self::Or(
            columns
                .iter()
                .map(|column| Self::contains(*column, term))
                .collect(),
        ))
    }

    /// Renders the filter as a `(key, value)` query pair.
    pub fn to_query_pair(&self) -> (String, String) {
        match self {
            Self::Compare { column, op, value } => {
                (column.clone(), format!("{}.{}", op.as_str(), value))
            }
            Self::Or(inner) => ("or".to_string(), render_group(inner)),
        }
    }

    fn render_nested(&self, out: &mut String) {
        match self {
            Self::Compare { column, op, value } => {
                let _ = write!(out, "{column}.{}.{}", op.as_str(), quote_value(value));
            }
            Self::Or(inner) => {
                out.push_str("or");
                out.push_str(&render_group(inner));
            }
        }
    }
}

fn render_group(inner: &[Filter]) -> String {
    let mut out = String::from("(");
    for (idx, filter) in inner.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        filter.render_nested(&mut out);
    }
    out.push(')');
    out
}

/// Quotes values that contain characters reserved inside logical groups.
fn quote_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\'))
        || value.starts_with(' ')
        || value.ends_with(' ');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Ordering clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    fn render(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{direction}", self.column)
    }
}

/// Parameters of a read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self::new("*")
    }
}

impl SelectQuery {
    pub fn new(select: impl Into<String>) -> Self {
        Self {
            select: select.into(),
            filters: Vec::new(),
            order: None,
            offset: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_opt(self, filter: Option<Filter>) -> Self {
        match filter {
            Some(filter) => self.filter(filter),
            None => self,
        }
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn range(mut self, offset: u64, limit: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query pairs in the order they are appended to the URL.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select.clone())];
        pairs.extend(self.filters.iter().map(Filter::to_query_pair));
        if let Some(order) = &self.order {
            pairs.push(("order".to_string(), order.render()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}
