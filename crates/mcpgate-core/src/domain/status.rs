//! Status DTOs served by the management API.
//!
//! These types are the observable shape of supervisor state. Field names are
//! camelCase because the surface is consumed by a dashboard UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ErrorKind;
use super::server::ProxyKind;
use crate::settings::ProxyMode;

/// Coarse lifecycle state shown per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// A bridge child exists for this server.
    Running,
    /// Start was refused or gave up (damper tripped, options exhausted).
    Failed,
    /// Configured but intentionally not proxied.
    Skipped,
}

/// One row of the status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusEntry {
    pub server_id: String,
    pub configured: bool,
    pub needs_proxy: bool,
    pub healthy: bool,
    pub auth_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type_used: Option<ProxyKind>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the child was spawned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    /// Base URL of the bridge, when a port is held.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub status: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

/// Aggregate counters across the desired set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub configured: usize,
    pub running: usize,
    pub healthy: usize,
    pub failed: usize,
    pub auth_required: usize,
}

/// Snapshot of the port pool, rendered in the status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortPoolStats {
    pub range_start: u16,
    pub range_end: u16,
    pub total: usize,
    pub allocated: usize,
    pub draining: usize,
    pub free: usize,
}

/// The full status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub mode: ProxyMode,
    pub servers: Vec<ServerStatusEntry>,
    pub counts: StatusCounts,
    pub port_pool: PortPoolStats,
}

/// One healthy server's OpenAPI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenapiEndpoint {
    pub server_id: String,
    pub base_url: String,
    pub openapi_url: String,
    pub docs_url: String,
    pub proxy_type: ProxyKind,
}

impl OpenapiEndpoint {
    /// Build the endpoint row from a base URL, normalizing trailing slashes.
    #[must_use]
    pub fn from_base(server_id: &str, base_url: &str, proxy_type: ProxyKind) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            server_id: server_id.to_string(),
            base_url: base.to_string(),
            openapi_url: format!("{base}/openapi.json"),
            docs_url: format!("{base}/docs"),
            proxy_type,
        }
    }
}
