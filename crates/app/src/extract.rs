//! Request extractors whose rejections render as problem documents.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ServiceError;

/// Query string parameters.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ServiceError))]
pub struct Params<T>(pub T);

/// JSON request body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
pub struct JsonBody<T>(pub T);
