use serde::Serialize;
use utoipa::ToSchema;

/// Structured error body returned by the HTTP surface.
/// Carries enough detail for a caller to see what went wrong and how to fix it.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const AUDIT_UNAVAILABLE: &str = "audit_unavailable";
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    DuplicateCapability(String),
    #[error("capability '{0}' is not registered")]
    NotFound(String),
    #[error("invalid descriptor for '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

/// Raised by a capability provider. Always converted into a degraded response.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider failed: {0}")]
    Failed(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("input is {len} characters, limit is {max}")]
    InputTooLong { len: usize, max: usize },
    #[error("classifier failure: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit record '{0}' not found")]
    NotFound(String),
    #[error("audit record '{0}' already exists")]
    Conflict(String),
    #[error("audit backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Audit read or write failed. On the submit path no response is released.
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("invalid review: {reason}")]
    InvalidReview { field: &'static str, reason: String },
}
