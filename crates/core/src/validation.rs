use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::slug::is_valid_slug;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email regex")
});
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\s\-()]{7,20}$").expect("phone regex"));

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 120;

/// Field-keyed validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("{}", summarize(.fields))]
pub struct ValidationErrors {
    fields: BTreeMap<&'static str, String>,
}

impl ValidationErrors {
    /// Records a message for `field`; the first message per field wins.
    pub fn insert(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn check(&mut self, field: &'static str, result: Result<(), String>) {
        if let Err(message) = result {
            self.insert(field, message);
        }
    }
}

fn summarize(fields: &BTreeMap<&'static str, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn validate_email(value: &str) -> Result<(), String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("email is required".into());
    }
    if !EMAIL_RE.is_match(value) {
        return Err("enter a valid email address".into());
    }
    Ok(())
}

pub fn validate_password(value: &str) -> Result<(), String> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    if !value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("password must contain an uppercase letter".into());
    }
    if !value.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("password must contain a lowercase letter".into());
    }
    if !value.chars().any(|c| c.is_ascii_digit()) {
        return Err("password must contain a digit".into());
    }
    Ok(())
}

pub fn validate_phone(value: &str) -> Result<(), String> {
    if PHONE_RE.is_match(value.trim()) {
        Ok(())
    } else {
        Err("enter a valid phone number".into())
    }
}

/// Requires non-blank text of at most `max` characters.
pub fn validate_required(value: &str, label: &str, max: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is required"));
    }
    if trimmed.chars().count() > max {
        return Err(format!("{label} must be at most {max} characters"));
    }
    Ok(())
}

/// Legal page editor input after slug resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalPageForm<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub content: &'a str,
}

impl LegalPageForm<'_> {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check("title", validate_required(self.title, "title", MAX_TITLE_LEN));
        if !is_valid_slug(self.slug) {
            errors.insert(
                "slug",
                "slug may only contain lowercase letters, digits and single dashes",
            );
        }
        if self.content.trim().is_empty() {
            errors.insert("content", "content is required");
        }
        errors.into_result()
    }
}

/// Operator self-registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationForm<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub confirm_password: &'a str,
    pub full_name: &'a str,
    pub phone: Option<&'a str>,
}

impl RegistrationForm<'_> {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check("email", validate_email(self.email));
        errors.check("password", validate_password(self.password));
        if self.password != self.confirm_password {
            errors.insert("confirmPassword", "passwords do not match");
        }
        errors.check(
            "fullName",
            validate_required(self.full_name, "full name", MAX_NAME_LEN),
        );
        if let Some(phone) = self.phone.filter(|value| !value.trim().is_empty()) {
            errors.check("phone", validate_phone(phone));
        }
        errors.into_result()
    }
}

/// Login input; only presence and shape are checked locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

impl LoginForm<'_> {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check("email", validate_email(self.email));
        if self.password.is_empty() {
            errors.insert("password", "password is required");
        }
        errors.into_result()
    }
}
