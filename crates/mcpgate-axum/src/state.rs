//! Shared application state type.

use std::sync::Arc;

use mcpgate_secrets::SecretStore;
use mcpgate_supervisor::{GatewayControl, SharedHealthHistory};

/// Services the handlers need.
pub struct AxumContext {
    /// The active gateway (individual or unified mode).
    pub gateway: Arc<dyn GatewayControl>,
    pub secrets: Arc<SecretStore>,
    /// Probe history written by the health monitor.
    pub history: SharedHealthHistory,
}

/// Application state shared across all handlers.
pub type AppState = Arc<AxumContext>;
