//! Typed clients for the remote data store: the table query API and the
//! authentication API, plus the retry and timeout helpers shared by both.

pub mod auth;
pub mod query;
pub mod rest;
pub mod retry;

pub use auth::{AuthClient, AuthError, AuthSession, AuthUser, SignUpOutcome};
pub use query::{Filter, Op, Order, SelectQuery};
pub use rest::{RestClient, RestError, RowsPage};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig, Retryable, TimedOut};
