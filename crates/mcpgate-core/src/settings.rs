//! Environment-driven settings.
//!
//! All knobs arrive through environment variables (the process typically runs
//! in a container next to the chat UI). Only the port range is validated
//! hard; everything else falls back to a default.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ProxyKind;
use crate::paths;

/// Default port range for bridge children.
pub const DEFAULT_PORT_RANGE_START: u16 = 4000;
pub const DEFAULT_PORT_RANGE_END: u16 = 4100;

/// Default port for the management API.
pub const DEFAULT_MANAGER_PORT: u16 = 8000;

/// Errors raised while reading settings. All of these are fatal at boot.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid port range {start}-{end}: must satisfy 1024 <= start < end <= 65535")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },
}

/// Supervision strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// One bridge child per server.
    #[default]
    Individual,
    /// One multiplexing bridge child serving route-per-server.
    Unified,
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" => Ok(Self::Individual),
            "unified" => Ok(Self::Unified),
            other => Err(format!("unknown proxy mode {other:?}")),
        }
    }
}

/// Auxiliary transports that unified mode can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Sse,
    Websocket,
    Streamable,
}

impl TransportKind {
    /// Endpoints probed for liveness, transport specific.
    #[must_use]
    pub const fn probe_endpoints(self) -> &'static [&'static str] {
        match self {
            Self::Sse => &["/", "/events", "/message", "/health"],
            Self::Websocket => &["/ws", "/", "/health"],
            Self::Streamable => &["/", "/message", "/health"],
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => write!(f, "sse"),
            Self::Websocket => write!(f, "websocket"),
            Self::Streamable => write!(f, "streamable"),
        }
    }
}

/// Per-transport enable flags for multi-transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportToggles {
    pub sse: bool,
    pub websocket: bool,
    pub streamable: bool,
}

impl TransportToggles {
    /// The transports that are switched on.
    #[must_use]
    pub fn enabled(self) -> Vec<TransportKind> {
        let mut kinds = Vec::new();
        if self.sse {
            kinds.push(TransportKind::Sse);
        }
        if self.websocket {
            kinds.push(TransportKind::Websocket);
        }
        if self.streamable {
            kinds.push(TransportKind::Streamable);
        }
        kinds
    }

    #[must_use]
    pub const fn any(self) -> bool {
        self.sse || self.websocket || self.streamable
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub mode: ProxyMode,
    /// Bridge tried first when a spec carries no hint.
    pub default_proxy_type: ProxyKind,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Path of the watched configuration document.
    pub config_path: PathBuf,
    /// Port the management API binds.
    pub manager_port: u16,
    pub transports: TransportToggles,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Individual,
            default_proxy_type: ProxyKind::Mcpo,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            config_path: paths::default_config_path(),
            manager_port: DEFAULT_MANAGER_PORT,
            transports: TransportToggles::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Read settings from an arbitrary lookup (testable without touching the
    /// process environment).
    pub fn from_source<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup("MCP_PROXY_MODE") {
            settings.mode = raw.parse().map_err(|_| SettingsError::InvalidValue {
                var: "MCP_PROXY_MODE".into(),
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("MCP_PROXY_TYPE") {
            settings.default_proxy_type = match raw.trim().to_ascii_lowercase().as_str() {
                "mcpo" => ProxyKind::Mcpo,
                "mcp-bridge" => ProxyKind::McpBridge,
                _ => {
                    return Err(SettingsError::InvalidValue {
                        var: "MCP_PROXY_TYPE".into(),
                        value: raw,
                    });
                }
            };
        }
        if let Some(raw) = lookup("PORT_RANGE_START") {
            settings.port_range_start = parse_port("PORT_RANGE_START", &raw)?;
        }
        if let Some(raw) = lookup("PORT_RANGE_END") {
            settings.port_range_end = parse_port("PORT_RANGE_END", &raw)?;
        }
        if let Some(raw) = lookup("CLAUDE_CONFIG_PATH") {
            settings.config_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("MANAGER_PORT") {
            settings.manager_port = parse_port("MANAGER_PORT", &raw)?;
        }
        settings.transports = TransportToggles {
            sse: lookup("MCP_ENABLE_SSE").is_some_and(|v| parse_bool(&v)),
            websocket: lookup("MCP_ENABLE_WEBSOCKET").is_some_and(|v| parse_bool(&v)),
            streamable: lookup("MCP_ENABLE_STREAMABLE").is_some_and(|v| parse_bool(&v)),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the port range invariant: `1024 <= start < end <= 65535`.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.port_range_start < 1024 || self.port_range_start >= self.port_range_end {
            return Err(SettingsError::InvalidPortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        Ok(())
    }
}

fn parse_port(var: &str, raw: &str) -> Result<u16, SettingsError> {
    raw.trim().parse().map_err(|_| SettingsError::InvalidValue {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_individual_mcpo() {
        let settings = Settings::from_source(|_| None).unwrap();
        assert_eq!(settings.mode, ProxyMode::Individual);
        assert_eq!(settings.default_proxy_type, ProxyKind::Mcpo);
        assert_eq!(settings.port_range_start, DEFAULT_PORT_RANGE_START);
        assert_eq!(settings.manager_port, DEFAULT_MANAGER_PORT);
        assert!(!settings.transports.any());
    }

    #[test]
    fn reads_mode_and_proxy_type() {
        let settings = Settings::from_source(source(&[
            ("MCP_PROXY_MODE", "unified"),
            ("MCP_PROXY_TYPE", "mcp-bridge"),
        ]))
        .unwrap();
        assert_eq!(settings.mode, ProxyMode::Unified);
        assert_eq!(settings.default_proxy_type, ProxyKind::McpBridge);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let err = Settings::from_source(source(&[
            ("PORT_RANGE_START", "5000"),
            ("PORT_RANGE_END", "4000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPortRange { .. }));
    }

    #[test]
    fn rejects_privileged_start() {
        let err = Settings::from_source(source(&[("PORT_RANGE_START", "80")])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPortRange { .. }));
    }

    #[test]
    fn rejects_garbage_mode() {
        let err = Settings::from_source(source(&[("MCP_PROXY_MODE", "cluster")])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
    }

    #[test]
    fn transport_toggles_parse_truthy_values() {
        let settings = Settings::from_source(source(&[
            ("MCP_ENABLE_SSE", "true"),
            ("MCP_ENABLE_WEBSOCKET", "0"),
            ("MCP_ENABLE_STREAMABLE", "1"),
        ]))
        .unwrap();
        assert_eq!(
            settings.transports.enabled(),
            vec![TransportKind::Sse, TransportKind::Streamable]
        );
    }
}
