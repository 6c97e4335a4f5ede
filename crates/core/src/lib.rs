//! Domain layer for the marketplace back office.
//!
//! Everything here is independent of the HTTP surface and of the remote
//! store client: entity records and their status enums, list query
//! normalization and pagination arithmetic, slug generation, form
//! validation and the flat error shape shown to operators.

pub mod entities;
pub mod error;
pub mod query;
pub mod slug;
pub mod validation;

pub use entities::{EntityStatus, Record, StatusRecord};
pub use error::{message_for_status, AppError};
pub use query::{ListParams, ListQuery, ListSpec, Page, PageMeta, SortOrder};
pub use validation::ValidationErrors;
