use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use market_admin_core::ValidationErrors;
use market_admin_postgrest::{AuthError, RestError, TimedOut};
use market_admin_storage::SessionError;
use thiserror::Error;
use tracing::{error, warn};

use crate::problem::ProblemResponse;

/// Failure of an admin operation, rendered as `application/problem+json`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("conflict: {0}")]
    Conflict(ValidationErrors),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Store(#[from] RestError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("session storage failed: {0}")]
    Session(#[from] SessionError),
    #[error("call {0}")]
    Timeout(#[from] TimedOut),
    #[error("malformed request: {detail}")]
    Malformed { status: StatusCode, detail: String },
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(err) => upstream_status(err.status()),
            Self::Auth(err) if err.is_rejected_credentials() => StatusCode::UNAUTHORIZED,
            Self::Auth(err) => upstream_status(err.status()),
            Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Malformed { status, .. } => *status,
        }
    }

    fn problem_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Store(RestError::NotFound { .. }) => "not_found",
            Self::Store(RestError::Timeout(_)) | Self::Timeout(_) => "timeout",
            Self::Store(err) if err.is_unique_violation() => "conflict",
            Self::Store(_) => "store_error",
            Self::Auth(err) if err.is_rejected_credentials() => "invalid_credentials",
            Self::Auth(_) => "auth_error",
            Self::Session(_) => "session_error",
            Self::Malformed { .. } => "malformed_request",
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Store(err) => err.code(),
            Self::Auth(err) => err.code(),
            _ => None,
        }
    }

    pub fn into_problem(self) -> ProblemResponse {
        let status = self.status();
        if status.is_server_error() {
            error!(stage = "app", status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(stage = "app", status = status.as_u16(), error = %self, "request rejected");
        }

        // Upstream messages may leak schema details, so they only reach the log.
        let detail = match &self {
            Self::Validation(_) => "one or more fields are invalid".to_string(),
            Self::Conflict(errors) => errors.to_string(),
            Self::Unauthorized(reason) | Self::Forbidden(reason) => (*reason).to_string(),
            Self::Store(RestError::NotFound { table, .. }) => format!("no such {table} row"),
            Self::Malformed { detail, .. } => detail.clone(),
            _ => status
                .canonical_reason()
                .unwrap_or("error")
                .to_ascii_lowercase(),
        };

        let problem = ProblemResponse::new(status, self.problem_type(), detail)
            .with_code(self.code().map(str::to_string));
        match self {
            Self::Validation(errors) | Self::Conflict(errors) => problem.with_errors(errors),
            _ => problem,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_problem().into_response()
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Malformed {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

/// Upstream 4xx statuses pass through; failures on the store side become 502.
fn upstream_status(status: Option<StatusCode>) -> StatusCode {
    match status {
        Some(status) if status == StatusCode::GATEWAY_TIMEOUT => status,
        Some(status) if status.is_client_error() => status,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(status: StatusCode, code: Option<&str>) -> RestError {
        RestError::Api {
            status,
            message: "boom".into(),
            code: code.map(str::to_string),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn store_failures_map_to_operator_statuses() {
        assert_eq!(
            ServiceError::from(api(StatusCode::CONFLICT, Some("23505"))).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::from(api(StatusCode::BAD_REQUEST, Some("23505"))).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::from(api(StatusCode::FORBIDDEN, Some("42501"))).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::from(api(StatusCode::SERVICE_UNAVAILABLE, None)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::from(RestError::NotFound {
                table: "users".into(),
                id: "u-1".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::from(TimedOut(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn rejected_credentials_are_unauthorized() {
        let err = ServiceError::from(AuthError::Api {
            status: StatusCode::BAD_REQUEST,
            message: "Invalid login credentials".into(),
            code: Some("invalid_credentials".into()),
        });
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.problem_type(), "invalid_credentials");
    }

    #[test]
    fn validation_keeps_field_errors() {
        let mut errors = ValidationErrors::default();
        errors.insert("email", "email is required");
        let problem = ServiceError::from(errors).into_problem();
        assert_eq!(problem.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
