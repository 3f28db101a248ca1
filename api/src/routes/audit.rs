use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medroute_core::audit::{AgentStatistics, AuditFilter, AuditKind, AuditRecord, MAX_LIST_LIMIT};
use medroute_core::error::ApiError;
use medroute_core::escalation::EscalationRecord;
use medroute_core::orchestrator::ReviewSubmission;

use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit/logs", get(list_audit_logs))
        .route("/v1/audit/logs/{audit_id}", get(get_audit_log))
        .route("/v1/audit/logs/{audit_id}/review", post(review_audit_log))
        .route("/v1/audit/escalations", get(list_escalations))
        .route("/v1/audit/stats/{agent_name}", get(agent_stats))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListAuditParams {
    /// Capability name (or "intent_classifier" / "orchestrator")
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Lower bound on post-wrapper confidence
    #[serde(default)]
    pub min_confidence: Option<f64>,
    /// Only records at or after this timestamp
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only records at or before this timestamp
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Only escalated (true) or non-escalated (false) records
    #[serde(default)]
    pub escalated: Option<bool>,
    /// Outcome kind, e.g. "completed", "timed_out", "safety_violation"
    #[serde(default)]
    pub kind: Option<String>,
    /// Maximum number of records to return (default 50, max 500)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct EscalationParams {
    /// Only escalations still awaiting review
    #[serde(default)]
    pub pending_only: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AuditLogsResponse {
    pub records: Vec<AuditRecord>,
    pub total: usize,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct EscalationsResponse {
    pub escalations: Vec<EscalationRecord>,
    pub total: usize,
}

impl TryFrom<ListAuditParams> for AuditFilter {
    type Error = AppError;

    fn try_from(params: ListAuditParams) -> Result<Self, Self::Error> {
        if let Some(min) = params.min_confidence.filter(|m| !(0.0..=1.0).contains(m)) {
            return Err(AppError::Validation {
                message: "min_confidence must be between 0 and 1".to_string(),
                field: Some("min_confidence".to_string()),
                received: Some(serde_json::json!(min)),
                docs_hint: None,
            });
        }
        if matches!((params.since, params.until), (Some(since), Some(until)) if since > until) {
            return Err(AppError::validation("since", "since must not be after until"));
        }
        if params.limit == Some(0) || params.limit.is_some_and(|l| l > MAX_LIST_LIMIT) {
            return Err(AppError::Validation {
                message: format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
                field: Some("limit".to_string()),
                received: params.limit.map(|l| serde_json::json!(l)),
                docs_hint: None,
            });
        }
        let kind = params
            .kind
            .as_deref()
            .map(|raw| {
                AuditKind::parse(raw.trim()).ok_or_else(|| AppError::Validation {
                    message: format!("unknown audit kind '{raw}'"),
                    field: Some("kind".to_string()),
                    received: Some(serde_json::Value::String(raw.to_string())),
                    docs_hint: Some(
                        "One of: completed, classification_failure, validation_failure, \
                         agent_execution_failure, timed_out, safety_violation, emergency_escalation"
                            .to_string(),
                    ),
                })
            })
            .transpose()?;

        Ok(AuditFilter {
            agent_name: params.agent_name.filter(|n| !n.trim().is_empty()),
            min_confidence: params.min_confidence,
            since: params.since,
            until: params.until,
            escalated: params.escalated,
            kind,
            limit: params.limit,
        })
    }
}

fn parse_audit_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation {
        message: "audit_id must be a valid UUID".to_string(),
        field: Some("audit_id".to_string()),
        received: Some(serde_json::Value::String(raw.to_string())),
        docs_hint: Some("Use an audit_id returned by POST /v1/orchestrator/query.".to_string()),
    })
}

/// List audit records, newest first
#[utoipa::path(
    get,
    path = "/v1/audit/logs",
    params(ListAuditParams),
    responses(
        (status = 200, description = "Matching audit records", body = AuditLogsResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 503, description = "Audit store unavailable", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<ListAuditParams>,
) -> Result<Json<AuditLogsResponse>, AppError> {
    let filter = AuditFilter::try_from(params)?;
    let records = state.orchestrator.list_audit_records(&filter).await?;
    Ok(Json(AuditLogsResponse {
        total: records.len(),
        records,
    }))
}

/// Fetch one audit record
#[utoipa::path(
    get,
    path = "/v1/audit/logs/{audit_id}",
    params(("audit_id" = Uuid, Path, description = "Audit record id")),
    responses(
        (status = 200, description = "Audit record", body = AuditRecord),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "No such record", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn get_audit_log(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Json<AuditRecord>, AppError> {
    let id = parse_audit_id(&audit_id)?;
    Ok(Json(state.orchestrator.get_audit_record(id).await?))
}

/// Attach a clinician review to an audit record
///
/// The only mutation an audit record accepts, and only once. Reviewing an
/// escalated record also closes its escalation.
#[utoipa::path(
    post,
    path = "/v1/audit/logs/{audit_id}/review",
    params(("audit_id" = Uuid, Path, description = "Audit record id")),
    request_body = ReviewSubmission,
    responses(
        (status = 200, description = "Reviewed record", body = AuditRecord),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "No such record", body = ApiError),
        (status = 409, description = "Already reviewed", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn review_audit_log(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
    AppJson(submission): AppJson<ReviewSubmission>,
) -> Result<Json<AuditRecord>, AppError> {
    let id = parse_audit_id(&audit_id)?;
    Ok(Json(
        state.orchestrator.review_audit_record(id, submission).await?,
    ))
}

/// List escalations, newest first
#[utoipa::path(
    get,
    path = "/v1/audit/escalations",
    params(EscalationParams),
    responses(
        (status = 200, description = "Escalation records", body = EscalationsResponse)
    ),
    tag = "audit"
)]
pub async fn list_escalations(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<EscalationParams>,
) -> Result<Json<EscalationsResponse>, AppError> {
    let escalations = state
        .orchestrator
        .list_escalations(params.pending_only)
        .await?;
    Ok(Json(EscalationsResponse {
        total: escalations.len(),
        escalations,
    }))
}

/// Per-agent outcome statistics
#[utoipa::path(
    get,
    path = "/v1/audit/stats/{agent_name}",
    params(("agent_name" = String, Path, description = "Capability name")),
    responses(
        (status = 200, description = "Agent statistics", body = AgentStatistics),
        (status = 404, description = "Unknown agent with no audit history", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn agent_stats(
    State(state): State<AppState>,
    Path(agent_name): Path<String>,
) -> Result<Json<AgentStatistics>, AppError> {
    let stats = state.orchestrator.agent_statistics(&agent_name).await?;
    let registered = state
        .orchestrator
        .list_capabilities()
        .iter()
        .any(|c| c.name == agent_name);
    if stats.total_invocations == 0 && !registered {
        return Err(AppError::NotFound {
            resource: "Agent".to_string(),
            id: agent_name,
        });
    }
    Ok(Json(stats))
}
