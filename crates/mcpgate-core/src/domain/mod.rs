//! Domain types shared across the supervisor, secret store, and API surface.

mod error;
mod health;
mod server;
mod status;

pub use error::{ErrorKind, ErrorRecord};
pub use health::{AlertKind, AlertSeverity, HealthAlert, HealthHistory, HealthMetrics, HealthRecord};
pub use server::{ProxyKind, ServerKind, ServerSpec};
pub use status::{
    OpenapiEndpoint, PortPoolStats, RunState, ServerStatusEntry, StatusCounts, StatusReport,
};
