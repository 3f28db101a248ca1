use std::sync::Arc;

use medroute_core::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;

    use medroute_core::audit::MemoryAuditStore;
    use medroute_core::config::OrchestratorConfig;
    use medroute_core::providers::register_reference_providers;
    use medroute_core::{AgentRegistry, Orchestrator};

    use super::AppState;

    /// State backed by the in-memory store and the reference providers.
    pub fn memory_state() -> AppState {
        let registry = AgentRegistry::new();
        register_reference_providers(&registry).expect("reference providers register");
        AppState::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(MemoryAuditStore::new()),
            OrchestratorConfig::default(),
        ))
    }
}
