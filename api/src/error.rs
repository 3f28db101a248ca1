use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use medroute_core::error::{self, ApiError, AuditError, OrchestratorError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Audit record or statistics subject does not exist (404)
    NotFound { resource: String, id: String },
    /// Audit record already reviewed (409)
    Conflict { message: String },
    /// Audit store could not be reached; nothing was released (503)
    AuditUnavailable(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} '{id}' not found"),
                    field: None,
                    received: Some(serde_json::Value::String(id)),
                    request_id,
                    docs_hint: Some(
                        "Audit ids come from query responses; agent names from GET /v1/orchestrator/agents."
                            .to_string(),
                    ),
                },
            ),
            AppError::Conflict { message } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "A record can be reviewed once. Fetch it to see the existing review."
                            .to_string(),
                    ),
                },
            ),
            AppError::AuditUnavailable(msg) => {
                tracing::error!("Audit store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::AUDIT_UNAVAILABLE.to_string(),
                        message: "The audit trail is unavailable; the request was not processed"
                            .to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry once GET /health reports ok.".to_string()),
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::NotFound(id) => AppError::NotFound {
                resource: "Audit record".to_string(),
                id,
            },
            AuditError::Conflict(id) => AppError::Conflict {
                message: format!("Audit record '{id}' has already been reviewed"),
            },
            AuditError::Backend(msg) => AppError::AuditUnavailable(msg),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Audit(audit) => audit.into(),
            OrchestratorError::InvalidReview { field, reason } => AppError::Validation {
                message: reason,
                field: Some(field.to_string()),
                received: None,
                docs_hint: Some(
                    "Send {\"reviewer_id\": \"...\", \"override\": true, \"override_reason\": \"...\"}."
                        .to_string(),
                ),
            },
        }
    }
}
