//! Raw serde shape of one `mcpServers` entry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::ProxyKind;

/// One entry of the `mcpServers` map, before kind discrimination.
///
/// Every field is optional; which fields matter depends on the transport.
/// Unknown fields are ignored so operator configs written for other MCP hosts
/// load unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerEntry {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub env_file: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// "sse" or "streamable-http"; anything else is treated as absent.
    pub transport: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub needs_proxy: Option<bool>,
    pub proxy_type: Option<ProxyKind>,
    #[serde(default)]
    pub always_allow: Vec<String>,
}

impl RawServerEntry {
    /// Whether the entry carries a usable remote URL.
    #[must_use]
    pub fn has_url(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}
