use std::sync::Arc;

use polygate_core::Orchestrator;

/// Shared axum state: just the orchestrator façade. No business logic lives
/// in this crate beyond wire translation and delegating to it (spec §6).
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
}
