//! Application state shared across routes.

use std::sync::Arc;

use steward_agent::Turn;
use steward_llm::SharedGateway;
use steward_session::SessionStore;

use crate::config::ServerConfig;

/// Shared application state.
///
/// Cheap to clone; every request handler receives a clone. Concurrent
/// connections share only these collaborators — the loop state itself is
/// per-request.
#[derive(Clone)]
pub struct AppState {
    /// The loop controller (gateway + registry + agent config).
    pub turn: Arc<Turn>,

    /// The gateway, held separately for readiness checks.
    pub gateway: SharedGateway,

    /// Session collaborator.
    pub sessions: Arc<dyn SessionStore>,

    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        turn: Arc<Turn>,
        gateway: SharedGateway,
        sessions: Arc<dyn SessionStore>,
        config: ServerConfig,
    ) -> Self {
        Self {
            turn,
            gateway,
            sessions,
            config,
        }
    }
}
