use serde::Serialize;
use thiserror::Error;

/// Flat error shape shown to operators as a banner or toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct AppError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl AppError {
    /// Builds an error whose message is selected from the HTTP status.
    pub fn from_status(status: u16, code: Option<String>) -> Self {
        Self {
            message: message_for_status(status).to_string(),
            code,
            status: Some(status),
        }
    }
}

/// Operator-facing message for an HTTP status.
pub fn message_for_status(status: u16) -> &'static str {
    match status {
        400 => "The request was invalid. Check the submitted values and try again.",
        401 => "Your session has expired. Please sign in again.",
        403 => "You do not have permission to perform this action.",
        404 => "The requested record could not be found.",
        409 => "This change conflicts with an existing record.",
        422 => "Some fields are invalid. Please correct them and try again.",
        429 => "Too many requests. Please wait a moment and try again.",
        500..=599 => "The service is temporarily unavailable. Please try again later.",
        _ => "Something went wrong. Please try again.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_message_by_status() {
        assert!(message_for_status(401).contains("sign in again"));
        assert!(message_for_status(404).contains("could not be found"));
        assert_eq!(message_for_status(502), message_for_status(503));
        assert_eq!(message_for_status(418), message_for_status(302));
    }

    #[test]
    fn from_status_picks_operator_message() {
        let err = AppError::from_status(409, Some("23505".into()));
        assert_eq!(err.status, Some(409));
        assert_eq!(err.code.as_deref(), Some("23505"));
        assert_eq!(err.to_string(), message_for_status(409));

        let json = serde_json::to_value(AppError::from_status(404, None)).expect("json");
        assert_eq!(json["status"], 404);
        assert!(json.get("code").is_none());
    }
}
