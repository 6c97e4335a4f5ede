use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use market_admin_core::{AppError, ValidationErrors};
use serde::Serialize;

/// RFC 7807 body. The flattened [`AppError`] carries the operator-facing
/// `message`, `code` and `status`; `detail` describes the failure itself.
#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    #[serde(flatten)]
    error: AppError,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                error: AppError::from_status(status.as_u16(), None),
                detail: detail.into(),
                errors: None,
            },
        }
    }

    pub fn with_code(mut self, code: Option<impl Into<String>>) -> Self {
        self.body.error.code = code.map(Into::into);
        self
    }

    pub fn with_errors(mut self, errors: ValidationErrors) -> Self {
        self.body.errors = Some(errors);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
