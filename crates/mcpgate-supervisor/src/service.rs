//! The control surface consumed by the management API.
//!
//! Individual and unified mode expose the same operations; the API layer
//! holds an `Arc<dyn GatewayControl>` and never knows which mode is active.

use std::path::PathBuf;

use async_trait::async_trait;
use mcpgate_core::{OpenapiEndpoint, StatusReport, load_config};

use crate::events::SupervisorError;
use crate::supervisor::SupervisorHandle;

/// Mode-independent gateway operations.
#[async_trait]
pub trait GatewayControl: Send + Sync {
    async fn status(&self) -> Result<StatusReport, SupervisorError>;
    async fn endpoints(&self) -> Result<Vec<OpenapiEndpoint>, SupervisorError>;
    async fn start(&self, server_id: &str) -> Result<(), SupervisorError>;
    async fn stop(&self, server_id: &str) -> Result<(), SupervisorError>;
    async fn restart(&self, server_id: &str) -> Result<(), SupervisorError>;
    /// Re-read the config file and reconcile. Returns the desired-set size.
    async fn reload_config(&self) -> Result<usize, SupervisorError>;
    async fn shutdown(&self);
}

/// Individual-mode gateway: one bridge child per server.
pub struct IndividualGateway {
    handle: SupervisorHandle,
    config_path: PathBuf,
}

impl IndividualGateway {
    #[must_use]
    pub fn new(handle: SupervisorHandle, config_path: PathBuf) -> Self {
        Self {
            handle,
            config_path,
        }
    }
}

#[async_trait]
impl GatewayControl for IndividualGateway {
    async fn status(&self) -> Result<StatusReport, SupervisorError> {
        self.handle.status().await
    }

    async fn endpoints(&self) -> Result<Vec<OpenapiEndpoint>, SupervisorError> {
        self.handle.endpoints().await
    }

    async fn start(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.handle.start(server_id).await
    }

    async fn stop(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.handle.stop(server_id).await
    }

    async fn restart(&self, server_id: &str) -> Result<(), SupervisorError> {
        self.handle.restart(server_id).await
    }

    async fn reload_config(&self) -> Result<usize, SupervisorError> {
        let (desired, _digest) = load_config(&self.config_path)
            .map_err(|e| SupervisorError::ConfigReload(e.to_string()))?;
        let count = desired.len();
        self.handle.reconcile(desired).await?;
        Ok(count)
    }

    async fn shutdown(&self) {
        self.handle.shutdown().await;
    }
}
