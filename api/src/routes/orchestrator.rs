use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use medroute_core::error::ApiError;
use medroute_core::orchestrator::{AggregatedResponse, OrchestratorHealth};
use medroute_core::registry::CapabilityInfo;
use medroute_core::ClinicalRequest;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn query_router() -> Router<AppState> {
    Router::new().route("/v1/orchestrator/query", post(submit_query))
}

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/orchestrator/agents", get(list_agents))
        .route("/v1/orchestrator/health", get(orchestrator_health))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AgentsResponse {
    pub agents: Vec<CapabilityInfo>,
    pub total: usize,
}

fn validate_request(request: &ClinicalRequest) -> Result<(), AppError> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation {
            message: "user_id must not be empty".to_string(),
            field: Some("user_id".to_string()),
            received: Some(serde_json::Value::String(request.user_id.clone())),
            docs_hint: Some(
                "user_id identifies the caller for the audit trail; it is stored only as a digest."
                    .to_string(),
            ),
        });
    }
    Ok(())
}

/// Route a clinical request to the matching capabilities
///
/// Every capability outcome is audited before the response is returned.
/// Requests carrying emergency cues are routed to the emergency capability
/// only and always come back with an escalation id.
#[utoipa::path(
    post,
    path = "/v1/orchestrator/query",
    request_body = ClinicalRequest,
    responses(
        (status = 200, description = "Aggregated capability response", body = AggregatedResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError),
        (status = 503, description = "Audit trail unavailable, nothing released", body = ApiError)
    ),
    tag = "orchestrator"
)]
pub async fn submit_query(
    State(state): State<AppState>,
    AppJson(request): AppJson<ClinicalRequest>,
) -> Result<Json<AggregatedResponse>, AppError> {
    validate_request(&request)?;
    let response = state.orchestrator.submit(request).await?;
    Ok(Json(response))
}

/// List registered capabilities
#[utoipa::path(
    get,
    path = "/v1/orchestrator/agents",
    responses(
        (status = 200, description = "Registered capabilities", body = AgentsResponse)
    ),
    tag = "orchestrator"
)]
pub async fn list_agents(State(state): State<AppState>) -> Json<AgentsResponse> {
    let agents = state.orchestrator.list_capabilities();
    Json(AgentsResponse {
        total: agents.len(),
        agents,
    })
}

/// Capability counts, timeouts and reliability counters
#[utoipa::path(
    get,
    path = "/v1/orchestrator/health",
    responses(
        (status = 200, description = "Orchestrator health", body = OrchestratorHealth)
    ),
    tag = "orchestrator"
)]
pub async fn orchestrator_health(State(state): State<AppState>) -> Json<OrchestratorHealth> {
    Json(state.orchestrator.health().await)
}
