use std::sync::LazyLock;

use regex::Regex;

pub const MAX_SLUG_LEN: usize = 80;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug regex"));

/// Derives a URL slug from a page title.
///
/// ASCII letters and digits are kept (lowercased); any other run of
/// characters collapses into a single dash.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}

pub fn is_valid_slug(value: &str) -> bool {
    value.len() <= MAX_SLUG_LEN && SLUG_RE.is_match(value)
}
