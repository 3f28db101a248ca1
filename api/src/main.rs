use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use medroute_core::audit::{AuditStore, MemoryAuditStore};
use medroute_core::config::OrchestratorConfig;
use medroute_core::providers::register_reference_providers;
use medroute_core::{AgentRegistry, Orchestrator};

mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MedRoute API",
        version = "0.1.0",
        description = "Routes clinical requests to capability providers. Every response is safety-wrapped and audited; emergencies are escalated for clinician review."
    ),
    paths(
        routes::health::health_check,
        routes::orchestrator::submit_query,
        routes::orchestrator::list_agents,
        routes::orchestrator::orchestrator_health,
        routes::audit::list_audit_logs,
        routes::audit::get_audit_log,
        routes::audit::review_audit_log,
        routes::audit::list_escalations,
        routes::audit::agent_stats,
    ),
    components(schemas(
        HealthResponse,
        routes::orchestrator::AgentsResponse,
        routes::audit::AuditLogsResponse,
        routes::audit::EscalationsResponse,
        medroute_core::error::ApiError,
        medroute_core::capability::ClinicalRequest,
        medroute_core::capability::UserRole,
        medroute_core::capability::UrgencyLevel,
        medroute_core::capability::CapabilityCategory,
        medroute_core::registry::CapabilityInfo,
        medroute_core::orchestrator::AggregatedResponse,
        medroute_core::orchestrator::CapabilityResult,
        medroute_core::orchestrator::ResultStatus,
        medroute_core::orchestrator::ReviewSubmission,
        medroute_core::orchestrator::OrchestratorHealth,
        medroute_core::orchestrator::ReliabilitySnapshot,
        medroute_core::safety::ConfidenceTier,
        medroute_core::audit::AuditRecord,
        medroute_core::audit::AuditKind,
        medroute_core::audit::ReviewStatus,
        medroute_core::audit::ReviewInfo,
        medroute_core::audit::AgentStatistics,
        medroute_core::escalation::EscalationRecord,
        medroute_core::escalation::EscalationReason,
        medroute_core::escalation::EscalationStatus,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// "postgres" or "memory"
    pub audit_backend: String,
}

async fn audit_store() -> Arc<dyn AuditStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL not set; audit records are kept in memory and lost on restart");
        return Arc::new(MemoryAuditStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Arc::new(store::PgAuditStore::new(pool))
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "medroute_api=debug,medroute_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let audit = audit_store().await;

    let registry = AgentRegistry::new();
    register_reference_providers(&registry).expect("Failed to register reference providers");
    tracing::info!(capabilities = registry.len(), "Capability registry populated");

    let config = OrchestratorConfig::from_env();
    let orchestrator = Orchestrator::new(Arc::new(registry), audit, config);
    let app_state = state::AppState::new(orchestrator);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::orchestrator::query_router().layer(middleware::rate_limit::query_layer()))
        .merge(routes::orchestrator::read_router())
        .merge(routes::audit::router().layer(middleware::rate_limit::audit_layer()))
        .layer(axum::middleware::from_fn(middleware::no_store::apply))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("MedRoute API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
